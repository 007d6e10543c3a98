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
use std::mem::size_of;
use std::sync::Arc;

use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use crate::exec::hash_table::EntryId;
use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};
use crate::runtime::runtime_state::RuntimeState;

/// Reusable pull buffer passed to `ExecNode::get_next`.
///
/// A producer either hands over a whole chunk (`set_chunk`) or, for hash-table backed nodes,
/// fills the pre-sized tuple buffer one entry at a time and attaches the materialized chunk
/// at the end. The row capacity bounds both paths; the byte limit is a soft budget checked
/// through `at_resource_limit`.
#[derive(Debug)]
pub struct RowBatch {
    capacity: usize,
    bytes_limit: usize,
    num_rows: usize,
    data_bytes: usize,
    chunk: Option<Chunk>,
    tuple_buffer: Vec<EntryId>,
    tuple_buffer_bytes: Option<TrackedBytes>,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl RowBatch {
    pub fn new(capacity: usize, bytes_limit: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bytes_limit,
            num_rows: 0,
            data_bytes: 0,
            chunk: None,
            tuple_buffer: Vec::new(),
            tuple_buffer_bytes: None,
            mem_tracker: None,
        }
    }

    /// Batch sized by the fragment's `chunk_size` and `chunk_bytes_limit`, charged to its
    /// mem tracker.
    pub fn for_state(state: &RuntimeState) -> Self {
        let mut batch = Self::new(state.chunk_size(), state.chunk_bytes_limit());
        batch.mem_tracker = state.mem_tracker();
        batch
    }

    pub fn with_mem_tracker(mut self, tracker: Arc<MemTracker>) -> Self {
        self.mem_tracker = Some(tracker);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_rows >= self.capacity
    }

    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    /// Whether the producer should stop adding rows even though capacity remains.
    pub fn at_resource_limit(&self) -> bool {
        if self.bytes_limit > 0 && self.data_bytes >= self.bytes_limit {
            return true;
        }
        self.mem_tracker
            .as_ref()
            .is_some_and(|t| t.any_limit_exceeded())
    }

    /// Reserve room for `capacity` output tuples.
    ///
    /// Fails with `AllocFailed` when the reservation cannot be satisfied.
    pub fn resize_and_allocate_tuple_buffer(&mut self) -> ExecResult<()> {
        self.tuple_buffer.clear();
        let needed = self.capacity.saturating_sub(self.tuple_buffer.capacity());
        self.tuple_buffer.try_reserve_exact(needed).map_err(|e| {
            ExecError::AllocFailed(format!(
                "failed to allocate tuple buffer for {} rows: {}",
                self.capacity, e
            ))
        })?;
        if self.tuple_buffer_bytes.is_none() {
            if let Some(tracker) = self.mem_tracker.as_ref() {
                let bytes = self.tuple_buffer.capacity() * size_of::<EntryId>();
                self.tuple_buffer_bytes = Some(TrackedBytes::new(bytes, Arc::clone(tracker)));
            }
        }
        Ok(())
    }

    /// Append one output tuple; `row_bytes` is its encoded width.
    pub fn push_tuple(&mut self, entry: EntryId, row_bytes: usize) -> ExecResult<()> {
        if self.tuple_buffer.len() >= self.capacity {
            return Err(ExecError::internal(format!(
                "row batch tuple buffer overflow (capacity={})",
                self.capacity
            )));
        }
        self.tuple_buffer.push(entry);
        self.num_rows += 1;
        self.data_bytes = self.data_bytes.saturating_add(row_bytes);
        Ok(())
    }

    pub fn tuples(&self) -> &[EntryId] {
        &self.tuple_buffer
    }

    /// Attach a finished chunk; the batch row count becomes the chunk's.
    pub fn set_chunk(&mut self, chunk: Chunk) {
        self.num_rows = chunk.len();
        self.data_bytes = self.data_bytes.max(chunk.logical_bytes());
        self.chunk = Some(chunk);
    }

    pub fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_ref()
    }

    pub fn take_chunk(&mut self) -> Option<Chunk> {
        self.chunk.take()
    }

    /// Clear rows for reuse; the tuple buffer keeps its allocation.
    pub fn reset(&mut self) {
        self.num_rows = 0;
        self.data_bytes = 0;
        self.chunk = None;
        self.tuple_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use arrow::array::Int32Array;

    #[test]
    fn tuple_buffer_is_bounds_checked() {
        let mut batch = RowBatch::new(2, 0);
        batch.resize_and_allocate_tuple_buffer().expect("alloc");
        batch.push_tuple(EntryId(0), 4).expect("first");
        batch.push_tuple(EntryId(1), 4).expect("second");
        assert!(batch.is_full());
        let err = batch.push_tuple(EntryId(2), 4).expect_err("overflow");
        assert!(matches!(err, ExecError::Internal(_)));
        assert_eq!(batch.tuples(), &[EntryId(0), EntryId(1)]);
    }

    #[test]
    fn byte_limit_marks_resource_limit() {
        let mut batch = RowBatch::new(100, 10);
        batch.resize_and_allocate_tuple_buffer().expect("alloc");
        batch.push_tuple(EntryId(0), 6).expect("push");
        assert!(!batch.at_resource_limit());
        batch.push_tuple(EntryId(1), 6).expect("push");
        assert!(batch.at_resource_limit());
        batch.reset();
        assert!(batch.is_empty());
        assert!(!batch.at_resource_limit());
    }

    #[test]
    fn tuple_buffer_memory_is_tracked_until_drop() {
        let root = MemTracker::new_root("row_batch_test");
        {
            let mut batch = RowBatch::new(8, 0).with_mem_tracker(Arc::clone(&root));
            batch.resize_and_allocate_tuple_buffer().expect("alloc");
            let charged = root.current();
            assert!(charged >= (8 * size_of::<EntryId>()) as i64);
            batch.reset();
            batch.resize_and_allocate_tuple_buffer().expect("realloc");
            assert_eq!(root.current(), charged);
        }
        assert_eq!(root.current(), 0);
    }

    #[test]
    fn exceeded_tracker_marks_resource_limit() {
        let root = MemTracker::new_child_with_limit("limited", 1, &MemTracker::new_root("r"));
        let batch = RowBatch::new(4, 0).with_mem_tracker(Arc::clone(&root));
        assert!(!batch.at_resource_limit());
        root.consume(2);
        assert!(batch.at_resource_limit());
        root.release(2);
    }

    #[test]
    fn set_chunk_takes_row_count() {
        let mut batch = RowBatch::new(4, 0);
        let chunk = Chunk::from_columns(
            &[SlotId::new(1)],
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
            0,
        )
        .expect("chunk");
        batch.set_chunk(chunk);
        assert_eq!(batch.num_rows(), 3);
        assert!(!batch.is_full());
        assert_eq!(batch.take_chunk().map(|c| c.len()), Some(3));
        assert!(batch.chunk().is_none());
    }
}
