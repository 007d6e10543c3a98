// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;

/// 128-bit id of a query or fragment instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

pub fn format_uuid(hi: i64, lo: i64) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        ((hi as u64) >> 32) as u32,
        ((hi as u64) >> 16) as u16,
        (hi as u64) as u16,
        ((lo as u64) >> 48) as u16,
        (lo as u64) & 0x0000_FFFF_FFFF_FFFF
    )
}

impl UniqueId {
    pub const fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }

    /// Short hex label used for mem tracker and profile names.
    pub fn short_label(self) -> String {
        format!("{:x}_{:x}", self.hi, self.lo)
    }

    pub fn to_uuid_string(self) -> String {
        format_uuid(self.hi, self.lo)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_uuid(self.hi, self.lo))
    }
}
