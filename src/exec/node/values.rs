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
//! VALUES exec node.
//!
//! Emits pre-built chunks in order, sliced to the consumer's batch capacity. Used as the leaf
//! under set operations when the input rows are already materialized.

use arrow::array::{Array, ArrayRef};

use crate::common::ids::SlotId;
use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use crate::exec::node::ExecNode;
use crate::exec::row_batch::RowBatch;
use crate::novarocks_logging::debug;
use crate::runtime::profile::{CounterRef, RuntimeProfile, TUnit};
use crate::runtime::runtime_state::RuntimeState;

pub struct ValuesNode {
    id: i32,
    name: String,
    output_slots: Vec<SlotId>,
    chunks: Vec<Chunk>,
    chunk_idx: usize,
    offset: usize,
    opened: bool,
    profile: RuntimeProfile,
    rows_returned: CounterRef,
}

impl ValuesNode {
    pub fn new(node_id: i32, output_slots: Vec<SlotId>, chunks: Vec<Chunk>) -> ExecResult<Self> {
        for (idx, chunk) in chunks.iter().enumerate() {
            for slot in &output_slots {
                chunk.column_by_slot_id(*slot).map_err(|e| {
                    ExecError::init(format!("values chunk {} missing output slot: {}", idx, e))
                })?;
            }
        }
        let name = if node_id >= 0 {
            format!("VALUES_NODE (id={node_id})")
        } else {
            "VALUES_NODE".to_string()
        };
        let profile = RuntimeProfile::new(name.clone());
        let rows_returned = profile.add_counter("RowsReturned", TUnit::Unit);
        Ok(Self {
            id: node_id,
            name,
            output_slots,
            chunks,
            chunk_idx: 0,
            offset: 0,
            opened: false,
            profile,
            rows_returned,
        })
    }

    /// Single-chunk node whose columns map one to one onto `output_slots`.
    pub fn from_columns(
        node_id: i32,
        output_slots: Vec<SlotId>,
        columns: Vec<ArrayRef>,
    ) -> ExecResult<Self> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        let chunk = Chunk::from_columns(&output_slots, columns, num_rows)?;
        Self::new(node_id, output_slots, vec![chunk])
    }

    fn skip_exhausted_chunks(&mut self) {
        while let Some(chunk) = self.chunks.get(self.chunk_idx) {
            if self.offset < chunk.len() {
                break;
            }
            self.chunk_idx += 1;
            self.offset = 0;
        }
    }
}

impl ExecNode for ValuesNode {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn output_slots(&self) -> &[SlotId] {
        &self.output_slots
    }

    fn runtime_profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    fn open(&mut self, _state: &RuntimeState) -> ExecResult<()> {
        self.chunk_idx = 0;
        self.offset = 0;
        self.opened = true;
        Ok(())
    }

    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        if !self.opened {
            return Err(ExecError::internal(format!(
                "{} get_next called before open",
                self.name
            )));
        }
        state.check_cancelled()?;
        batch.reset();
        self.skip_exhausted_chunks();
        let Some(chunk) = self.chunks.get(self.chunk_idx) else {
            return Ok(true);
        };
        let len = (chunk.len() - self.offset).min(batch.capacity());
        batch.set_chunk(chunk.slice(self.offset, len));
        self.offset += len;
        self.rows_returned.add(len as i64);
        self.skip_exhausted_chunks();
        Ok(self.chunk_idx >= self.chunks.len())
    }

    fn close(&mut self, _state: &RuntimeState) {
        if self.opened {
            debug!(
                node = %self.name,
                rows = self.rows_returned.value(),
                "values node closed"
            );
        }
        self.opened = false;
    }
}
