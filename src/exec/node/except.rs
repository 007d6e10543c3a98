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
use crate::exec::hash_table::SetHashTable;
use crate::exec::node::set_op::{SetOpNode, SetOpSemantics};

/// Anchor rows absent from every other child.
pub struct ExceptSemantics;

impl SetOpSemantics for ExceptSemantics {
    const NODE_NAME: &'static str = "EXCEPT_NODE";
    const BUILD_CONTEXT: &'static str = "Except, while constructing the hash table.";
    const PROBE_CONTEXT: &'static str = "Except, while probing the hash table.";

    fn keep_on_rebuild(matched: bool) -> bool {
        !matched
    }

    fn emit(matched: bool) -> bool {
        !matched
    }

    fn surviving(table: &SetHashTable) -> usize {
        table.num_unmatched()
    }
}

pub type ExceptNode = SetOpNode<ExceptSemantics>;
