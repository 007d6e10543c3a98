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
use crate::novarocks_config::config as novarocks_app_config;

pub(crate) fn debug_exec_node_output() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.debug.exec_node_output)
        .unwrap_or(false)
}

pub(crate) fn chunk_size() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.chunk_size)
        .filter(|v| *v > 0)
        .unwrap_or(4096)
}

pub(crate) fn chunk_bytes_limit() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.chunk_bytes_limit)
        .filter(|v| *v > 0)
        .unwrap_or(8 * 1024 * 1024)
}

pub(crate) fn set_op_hash_table_buckets() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.set_op_hash_table_buckets)
        .unwrap_or(1024)
}

pub(crate) fn query_mem_limit_bytes() -> Option<i64> {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.query_mem_limit_bytes)
        .filter(|v| *v >= 0)
}
