// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use peerlake_common::error::LakeError;
use peerlake_common::state::GossipMessage;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_SIZE: usize = 4;

/// Length prefixed frames: 4 bytes big-endian length followed by a json envelope.
///
/// The decoder yields raw frame bodies so that a malformed envelope can be dropped by
/// the reader without tearing down the connection. An oversized frame is a protocol
/// violation and ends the stream.
#[derive(Debug, Clone)]
pub struct GossipCodec {
    max_frame_size: usize,
}

impl GossipCodec {
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as u64) as usize,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, len: usize) -> Result<(), LakeError> {
        if len > self.max_frame_size {
            Err(LakeError::InvalidArgument(format!(
                "frame of {} bytes exceeds the limit of {} bytes",
                len, self.max_frame_size
            )))
        } else {
            Ok(())
        }
    }
}

impl Decoder for GossipCodec {
    type Item = BytesMut;
    type Error = LakeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&src[..HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;
        self.check_size(len)?;

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<Bytes> for GossipCodec {
    type Error = LakeError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.check_size(item.len())?;

        dst.reserve(HEADER_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

impl Encoder<GossipMessage> for GossipCodec {
    type Error = LakeError;

    fn encode(&mut self, item: GossipMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = Bytes::from(item.encode()?);
        Encoder::<Bytes>::encode(self, body, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlake_common::state::MessageBody;

    fn heartbeat() -> GossipMessage {
        GossipMessage::new(
            "a",
            MessageBody::Heartbeat {
                node_id: "a".to_string(),
            },
        )
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = GossipCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(heartbeat(), &mut buf).unwrap();
        let total = buf.len();

        let mut partial = buf.split_to(total - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);

        let frame = codec.decode(&mut partial).unwrap().unwrap();
        let msg = GossipMessage::decode(&frame).unwrap();
        assert_eq!(msg.kind(), "heartbeat");
        assert!(partial.is_empty());
    }

    #[test]
    fn reject_oversized_frames() {
        let mut codec = GossipCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        buf.put_slice(&[0u8; 17]);
        assert!(codec.decode(&mut buf).is_err());
        assert!(codec.encode(heartbeat(), &mut BytesMut::new()).is_err());
    }
}
