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

use chrono::{Local, TimeZone};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct LocalTime;

impl LocalTime {
    pub fn mills() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|v| v.as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn now_datetime() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn mills_to_datetime(mills: u64) -> String {
        match Local.timestamp_millis_opt(mills as i64).single() {
            Some(v) => v.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => mills.to_string(),
        }
    }
}
