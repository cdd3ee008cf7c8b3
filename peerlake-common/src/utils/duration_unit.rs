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
use std::time::Duration;

/// Human readable duration such as `500ms`, `30s`, `10m`, `6h` or `1d`.
/// A bare number is read as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationUnit {
    mills: u64,
}

impl DurationUnit {
    pub fn new(mills: u64) -> Self {
        Self { mills }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.mills)
    }

    pub fn as_millis(&self) -> u64 {
        self.mills
    }
}

impl FromStr for DurationUnit {
    type Err = LakeError;

    fn from_str(value: &str) -> LakeResult<Self> {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return err_box!("empty duration");
        }

        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (num, unit) = value.split_at(split);
        let num: u64 = match num.parse() {
            Ok(v) => v,
            Err(_) => return err_box!("invalid duration: {}", value),
        };

        let factor = match unit.trim() {
            "" | "ms" => 1,
            "s" => 1000,
            "m" | "min" => 60 * 1000,
            "h" => 60 * 60 * 1000,
            "d" => 24 * 60 * 60 * 1000,
            _ => return err_box!("invalid duration unit: {}", value),
        };

        Ok(Self::new(num * factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units() {
        assert_eq!(DurationUnit::from_str("30s").unwrap().as_millis(), 30_000);
        assert_eq!(DurationUnit::from_str("1m").unwrap().as_millis(), 60_000);
        assert_eq!(DurationUnit::from_str("250ms").unwrap().as_millis(), 250);
        assert_eq!(DurationUnit::from_str("250").unwrap().as_millis(), 250);
        assert_eq!(
            DurationUnit::from_str("2h").unwrap().as_duration(),
            Duration::from_secs(7200)
        );
        assert!(DurationUnit::from_str("abc").is_err());
        assert!(DurationUnit::from_str("10y").is_err());
    }

    #[test]
    fn parse_through_str() {
        let unit: DurationUnit = " 5s ".parse().unwrap();
        assert_eq!(unit.as_duration(), Duration::from_secs(5));
        assert!("".parse::<DurationUnit>().is_err());
    }
}
