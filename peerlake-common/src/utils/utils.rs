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

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

pub struct Utils;

impl Utils {
    pub fn uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn rand_str(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// Lowercase hex SHA-256 of `data`.
    pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        format!("{:x}", hasher.finalize())
    }

    pub fn test_dir(name: impl AsRef<str>) -> String {
        std::env::temp_dir()
            .join(format!("peerlake-{}-{}", name.as_ref(), Self::uuid()))
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            Utils::sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(Utils::rand_str(12).len(), 12);
        assert_ne!(Utils::uuid(), Utils::uuid());
    }
}
