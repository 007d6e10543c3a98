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
//! Pull-based exec node tree.
//!
//! A parent opens a child, pulls row batches from it until the child reports end of stream,
//! and closes it. `get_next` may return rows together with `eos = true`; callers consume the
//! batch before stopping.

pub mod except;
pub mod intersect;
pub mod set_op;
pub mod values;

use crate::common::ids::SlotId;
use crate::common::status::ExecResult;
use crate::exec::row_batch::RowBatch;
use crate::runtime::profile::RuntimeProfile;
use crate::runtime::runtime_state::RuntimeState;

pub trait ExecNode: Send {
    fn id(&self) -> i32;

    fn name(&self) -> &str;

    /// Slots of the tuple this node produces, in column order.
    fn output_slots(&self) -> &[SlotId];

    fn runtime_profile(&self) -> &RuntimeProfile;

    fn open(&mut self, state: &RuntimeState) -> ExecResult<()>;

    /// Fill `batch` with the next rows and return whether the stream is exhausted.
    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool>;

    /// Release resources. Must tolerate repeated calls and calls after a failed `open`.
    fn close(&mut self, state: &RuntimeState);
}

pub type BoxedExecNode = Box<dyn ExecNode>;
