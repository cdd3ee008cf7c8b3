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

use crate::error::LakeError;
use crate::{err_box, LakeResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteUnit {
    bytes: u64,
}

impl ByteUnit {
    pub const KB: u64 = 1024;
    pub const MB: u64 = 1024 * Self::KB;
    pub const GB: u64 = 1024 * Self::MB;
    pub const TB: u64 = 1024 * Self::GB;

    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn as_byte(&self) -> u64 {
        self.bytes
    }

    pub fn byte_to_string(bytes: u64) -> String {
        if bytes == 0 {
            return "0 Bytes".to_string();
        }

        let units = ["Bytes", "KB", "MB", "GB", "TB"];
        let mut value = bytes as f64;
        let mut idx = 0;
        while value >= 1024.0 && idx < units.len() - 1 {
            value /= 1024.0;
            idx += 1;
        }

        if idx == 0 {
            format!("{} {}", bytes, units[idx])
        } else {
            format!("{:.2} {}", value, units[idx])
        }
    }
}

impl FromStr for ByteUnit {
    type Err = LakeError;

    fn from_str(value: &str) -> LakeResult<Self> {
        let value = value.trim().to_uppercase();
        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (num, unit) = value.split_at(split);
        let num: u64 = match num.parse() {
            Ok(v) => v,
            Err(_) => return err_box!("invalid byte size: {}", value),
        };

        let factor = match unit.trim() {
            "" | "B" => 1,
            "K" | "KB" => Self::KB,
            "M" | "MB" => Self::MB,
            "G" | "GB" => Self::GB,
            "T" | "TB" => Self::TB,
            _ => return err_box!("invalid byte unit: {}", value),
        };

        Ok(Self::new(num * factor))
    }
}
