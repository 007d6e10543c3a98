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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use arrow::array::{Array, ArrayRef, Int32Array, StringArray};
use tempfile::TempDir;

use novarocks_setop::common::ids::{SlotId, TupleId};
use novarocks_setop::common::types::UniqueId;
use novarocks_setop::exec::expr::{ExprDesc, PrimitiveType};
use novarocks_setop::exec::node::values::ValuesNode;
use novarocks_setop::exec::row_batch::RowBatch;
use novarocks_setop::runtime::mem_tracker::MemTracker;
use novarocks_setop::runtime::profile::RuntimeProfile;
use novarocks_setop::{
    BoxedExecNode, ExecNode, ExecResult, RuntimeState, SetOperationNodeDesc, novarocks_config,
    novarocks_logging,
};

/// Output slot every set-operation test node projects into.
pub const OUTPUT_SLOT: u32 = 100;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");

        let config_content = r#"
log_level = "debug"

[runtime]
chunk_size = 1024
chunk_bytes_limit = 1048576
set_op_hash_table_buckets = 64

[debug]
exec_node_output = true
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Parse the test configuration without installing it process-wide.
    pub fn parse_config(&self) -> anyhow::Result<novarocks_config::NovaRocksConfig> {
        novarocks_config::NovaRocksConfig::load_from_file(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Generate a test fragment instance ID.
pub fn test_query_id() -> UniqueId {
    UniqueId::new(1234567890, 9876543210)
}

/// VALUES child producing one nullable INT column in `slot`.
pub fn int_child(node_id: i32, slot: u32, rows: Vec<Option<i32>>) -> BoxedExecNode {
    Box::new(
        ValuesNode::from_columns(
            node_id,
            vec![SlotId::new(slot)],
            vec![Arc::new(Int32Array::from(rows)) as ArrayRef],
        )
        .expect("values node"),
    )
}

/// Non-null shorthand for `int_child`.
pub fn ints(node_id: i32, slot: u32, rows: &[i32]) -> BoxedExecNode {
    int_child(node_id, slot, rows.iter().copied().map(Some).collect())
}

/// Plan for a single INT column where child `i` reads slot `i + 1`.
pub fn int_set_op_desc(node_id: i32, num_children: usize) -> SetOperationNodeDesc {
    SetOperationNodeDesc {
        node_id,
        tuple_id: TupleId(1),
        output_slots: vec![SlotId::new(OUTPUT_SLOT)],
        result_expr_lists: (0..num_children)
            .map(|i| vec![ExprDesc::slot(i as u32 + 1, PrimitiveType::Int)])
            .collect(),
        find_nulls: true,
        limit: None,
    }
}

/// Children for `int_set_op_desc`: the anchor first, then each subtrahend.
pub fn int_children(anchor: &[i32], others: &[&[i32]]) -> Vec<BoxedExecNode> {
    let mut children = vec![ints(1, 1, anchor)];
    for (i, rows) in others.iter().enumerate() {
        children.push(ints(i as i32 + 2, i as u32 + 2, rows));
    }
    children
}

/// Result of draining a node: rows of column 0 in output order plus batch shape.
pub struct Drained {
    pub rows: Vec<Option<i32>>,
    pub batch_sizes: Vec<usize>,
}

impl Drained {
    pub fn sorted(&self) -> Vec<Option<i32>> {
        let mut rows = self.rows.clone();
        rows.sort();
        rows
    }
}

/// Open `node`, pull until end of stream and close it.
pub fn drain_ints(
    node: &mut dyn ExecNode,
    state: &RuntimeState,
    capacity: usize,
) -> ExecResult<Drained> {
    let result = drain_ints_inner(node, state, capacity);
    node.close(state);
    result
}

fn drain_ints_inner(
    node: &mut dyn ExecNode,
    state: &RuntimeState,
    capacity: usize,
) -> ExecResult<Drained> {
    node.open(state)?;
    let mut batch = RowBatch::new(capacity, 0);
    let mut drained = Drained {
        rows: Vec::new(),
        batch_sizes: Vec::new(),
    };
    loop {
        let eos = node.get_next(state, &mut batch)?;
        if let Some(chunk) = batch.chunk() {
            assert!(chunk.len() <= capacity, "batch exceeded its capacity");
            let column = chunk
                .column_by_slot_id(SlotId::new(OUTPUT_SLOT))
                .expect("output slot");
            let values = column
                .as_any()
                .downcast_ref::<Int32Array>()
                .expect("int32 output");
            drained.rows.extend(values.iter());
            drained.batch_sizes.push(chunk.len());
        }
        if eos {
            break;
        }
    }
    Ok(drained)
}

/// Counts how often the wrapped node is opened.
pub struct OpenTracker {
    inner: BoxedExecNode,
    opens: Arc<AtomicUsize>,
}

impl OpenTracker {
    pub fn wrap(inner: BoxedExecNode) -> (BoxedExecNode, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let node = Box::new(Self {
            inner,
            opens: Arc::clone(&opens),
        });
        (node, opens)
    }
}

impl ExecNode for OpenTracker {
    fn id(&self) -> i32 {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn output_slots(&self) -> &[SlotId] {
        self.inner.output_slots()
    }

    fn runtime_profile(&self) -> &RuntimeProfile {
        self.inner.runtime_profile()
    }

    fn open(&mut self, state: &RuntimeState) -> ExecResult<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(state)
    }

    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        self.inner.get_next(state, batch)
    }

    fn close(&mut self, state: &RuntimeState) {
        self.inner.close(state)
    }
}

/// Raises the fragment's cancel flag after the wrapped node has produced `after` batches.
pub struct CancelAfter {
    inner: BoxedExecNode,
    cancel: Arc<AtomicBool>,
    after: usize,
    batches: usize,
}

impl CancelAfter {
    pub fn wrap(inner: BoxedExecNode, cancel: Arc<AtomicBool>, after: usize) -> BoxedExecNode {
        Box::new(Self {
            inner,
            cancel,
            after,
            batches: 0,
        })
    }
}

impl ExecNode for CancelAfter {
    fn id(&self) -> i32 {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn output_slots(&self) -> &[SlotId] {
        self.inner.output_slots()
    }

    fn runtime_profile(&self) -> &RuntimeProfile {
        self.inner.runtime_profile()
    }

    fn open(&mut self, state: &RuntimeState) -> ExecResult<()> {
        self.inner.open(state)
    }

    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        let eos = self.inner.get_next(state, batch)?;
        self.batches += 1;
        if self.batches >= self.after {
            self.cancel.store(true, Ordering::Release);
        }
        Ok(eos)
    }

    fn close(&mut self, state: &RuntimeState) {
        self.inner.close(state)
    }
}

/// Charges `bytes_per_pull` to `tracker` on every pull, released again on close.
pub struct ConsumeOnPull {
    inner: BoxedExecNode,
    tracker: Arc<MemTracker>,
    bytes_per_pull: i64,
    consumed: i64,
}

impl ConsumeOnPull {
    pub fn wrap(
        inner: BoxedExecNode,
        tracker: Arc<MemTracker>,
        bytes_per_pull: i64,
    ) -> BoxedExecNode {
        Box::new(Self {
            inner,
            tracker,
            bytes_per_pull,
            consumed: 0,
        })
    }
}

impl ExecNode for ConsumeOnPull {
    fn id(&self) -> i32 {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn output_slots(&self) -> &[SlotId] {
        self.inner.output_slots()
    }

    fn runtime_profile(&self) -> &RuntimeProfile {
        self.inner.runtime_profile()
    }

    fn open(&mut self, state: &RuntimeState) -> ExecResult<()> {
        self.inner.open(state)
    }

    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        let eos = self.inner.get_next(state, batch)?;
        self.tracker.consume(self.bytes_per_pull);
        self.consumed += self.bytes_per_pull;
        Ok(eos)
    }

    fn close(&mut self, state: &RuntimeState) {
        self.tracker.release(self.consumed);
        self.consumed = 0;
        self.inner.close(state)
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}
