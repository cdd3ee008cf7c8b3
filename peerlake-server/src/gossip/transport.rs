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

use log::debug;
use peerlake_common::state::GossipMessage;
use peerlake_common::LakeResult;

/// Delivery to directly connected peers.
pub trait Transport {
    fn send_to(&mut self, peer: &str, msg: &GossipMessage) -> LakeResult<()>;

    fn connected_peers(&self) -> Vec<String>;
}

/// Strategy used to spread a broadcast over the direct peers.
pub trait Dissemination: Send {
    /// Returns the number of peers the message was handed to.
    fn disseminate(
        &self,
        transport: &mut dyn Transport,
        msg: &GossipMessage,
        exclude: Option<&str>,
    ) -> usize;
}

/// Sends to every direct peer but `exclude`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FloodDissemination;

impl Dissemination for FloodDissemination {
    fn disseminate(
        &self,
        transport: &mut dyn Transport,
        msg: &GossipMessage,
        exclude: Option<&str>,
    ) -> usize {
        let mut sent = 0;
        for peer in transport.connected_peers() {
            if Some(peer.as_str()) == exclude {
                continue;
            }
            match transport.send_to(&peer, msg) {
                Ok(_) => sent += 1,
                Err(e) => debug!("flood of {} to {} failed: {}", msg, peer, e),
            }
        }
        sent
    }
}
