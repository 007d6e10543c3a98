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
//! Hash-table based set operations (EXCEPT / INTERSECT) over N children.
//!
//! Responsibilities:
//! - Builds a deduplicated hash table from child 0 (the anchor).
//! - Probes children 1..N in order, marking anchor entries found in each one.
//! - Before every pass after the first, rebuilds the table from the entries the semantics
//!   keep, so each pass starts from fresh `matched = false` flags.
//! - Streams the selected entries into bounded row batches, honoring the node's row limit.
//!
//! The per-operation differences live in `SetOpSemantics`; `ExceptNode` and `IntersectNode`
//! are type aliases over `SetOpNode`.

use std::marker::PhantomData;
use std::sync::Arc;

use arrow::datatypes::DataType;
use serde::Deserialize;

use crate::common::config;
use crate::common::ids::{SlotId, TupleId};
use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprArena, ExprDesc, ExprId, compile_expr};
use crate::exec::hash_table::{HashTableIter, HashTableParams, SetHashTable};
use crate::exec::node::except::ExceptNode;
use crate::exec::node::intersect::IntersectNode;
use crate::exec::node::{BoxedExecNode, ExecNode};
use crate::exec::row_batch::RowBatch;
use crate::novarocks_logging::{debug, trace};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{CounterRef, RuntimeProfile, ScopedTimer, TUnit};
use crate::runtime::runtime_state::RuntimeState;

/// Estimated encoded width of a variable-length key column.
const VARLEN_KEY_BYTES_ESTIMATE: usize = 16;

/// Entries copied between cancellation checks while rebuilding.
const REBUILD_CANCEL_CHECK_INTERVAL: usize = 1024;

pub trait SetOpSemantics: Send + 'static {
    const NODE_NAME: &'static str;
    const BUILD_CONTEXT: &'static str;
    const PROBE_CONTEXT: &'static str;

    /// Whether an entry with this flag is copied into the table rebuilt for the next pass.
    fn keep_on_rebuild(matched: bool) -> bool;

    /// Whether an entry with this flag is part of the final result.
    fn emit(matched: bool) -> bool;

    /// Number of entries that can still reach the result after the current pass.
    fn surviving(table: &SetHashTable) -> usize;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetOpKind {
    Except,
    Intersect,
}

fn default_find_nulls() -> bool {
    true
}

/// Plan description of one set-operation node.
#[derive(Clone, Debug, Deserialize)]
pub struct SetOperationNodeDesc {
    pub node_id: i32,
    pub tuple_id: TupleId,
    pub output_slots: Vec<SlotId>,
    /// One list per child, each as long as `output_slots`.
    pub result_expr_lists: Vec<Vec<ExprDesc>>,
    #[serde(default = "default_find_nulls")]
    pub find_nulls: bool,
    /// Negative or absent means unlimited.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl SetOperationNodeDesc {
    pub fn from_json(text: &str) -> ExecResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| ExecError::init(format!("invalid set operation plan: {e}")))
    }
}

/// Build an EXCEPT or INTERSECT node over `children`.
pub fn create_set_op_node(
    kind: SetOpKind,
    desc: SetOperationNodeDesc,
    children: Vec<BoxedExecNode>,
) -> ExecResult<BoxedExecNode> {
    Ok(match kind {
        SetOpKind::Except => Box::new(ExceptNode::new(desc, children)?),
        SetOpKind::Intersect => Box::new(IntersectNode::new(desc, children)?),
    })
}

pub struct SetOpNode<S: SetOpSemantics> {
    id: i32,
    name: String,
    tuple_id: TupleId,
    output_slots: Vec<SlotId>,
    children: Vec<BoxedExecNode>,
    arena: Arc<ExprArena>,
    child_expr_lists: Vec<Vec<ExprId>>,
    key_types: Vec<DataType>,
    tuple_byte_size: usize,
    find_nulls: bool,
    limit: Option<usize>,
    hash_tbl: Option<SetHashTable>,
    iter: HashTableIter,
    num_rows_returned: usize,
    mem_tracker: Option<Arc<MemTracker>>,
    log_output_rows: bool,
    closed: bool,
    profile: RuntimeProfile,
    build_timer: CounterRef,
    probe_timer: CounterRef,
    total_timer: CounterRef,
    rows_returned_counter: CounterRef,
    _semantics: PhantomData<S>,
}

impl<S: SetOpSemantics> SetOpNode<S> {
    /// Validate the plan description and compile each child's result expressions.
    pub fn new(desc: SetOperationNodeDesc, children: Vec<BoxedExecNode>) -> ExecResult<Self> {
        let name = format!("{} (id={})", S::NODE_NAME, desc.node_id);
        if children.len() < 2 {
            return Err(ExecError::init(format!(
                "{name} requires at least 2 children, got {}",
                children.len()
            )));
        }
        if desc.result_expr_lists.len() != children.len() {
            return Err(ExecError::init(format!(
                "{name} has {} result expression lists for {} children",
                desc.result_expr_lists.len(),
                children.len()
            )));
        }
        if desc.output_slots.is_empty() {
            return Err(ExecError::init(format!("{name} with zero columns is unsupported")));
        }

        let mut arena = ExprArena::default();
        let mut child_expr_lists = Vec::with_capacity(children.len());
        for (child_idx, list) in desc.result_expr_lists.iter().enumerate() {
            if list.len() != desc.output_slots.len() {
                return Err(ExecError::init(format!(
                    "{name} child {child_idx} has {} result expressions, expected {}",
                    list.len(),
                    desc.output_slots.len()
                )));
            }
            let ids = list
                .iter()
                .map(|expr| compile_expr(&mut arena, expr))
                .collect::<ExecResult<Vec<_>>>()
                .map_err(|e| ExecError::init(format!("{name} child {child_idx}: {e}")))?;
            child_expr_lists.push(ids);
        }

        let key_types = child_expr_lists[0]
            .iter()
            .map(|id| arena.data_type(*id).cloned().unwrap_or(DataType::Null))
            .collect::<Vec<_>>();
        for (child_idx, ids) in child_expr_lists.iter().enumerate().skip(1) {
            for (col, (id, key_type)) in ids.iter().zip(key_types.iter()).enumerate() {
                let ty = arena.data_type(*id).cloned().unwrap_or(DataType::Null);
                // No implicit conversion: a lossy cast could make unequal keys compare equal.
                if ty != *key_type {
                    return Err(ExecError::init(format!(
                        "{name} child {child_idx} column {col} has type {ty:?}, expected \
                         {key_type:?}; add an explicit cast"
                    )));
                }
            }
        }
        let tuple_byte_size = key_types
            .iter()
            .map(|t| 1 + t.primitive_width().unwrap_or(VARLEN_KEY_BYTES_ESTIMATE))
            .sum();

        let profile = RuntimeProfile::new(name.clone());
        profile.add_info_string("NumChildren", children.len().to_string());
        let build_timer = profile.add_timer("BuildTime");
        let probe_timer = profile.add_timer("ProbeTime");
        let total_timer = profile.add_timer("TotalTime");
        let rows_returned_counter = profile.add_counter("RowsReturned", TUnit::Unit);

        Ok(Self {
            id: desc.node_id,
            name,
            tuple_id: desc.tuple_id,
            output_slots: desc.output_slots,
            children,
            arena: Arc::new(arena),
            child_expr_lists,
            key_types,
            tuple_byte_size,
            find_nulls: desc.find_nulls,
            limit: desc.limit.and_then(|l| usize::try_from(l).ok()),
            hash_tbl: None,
            iter: HashTableIter::default(),
            num_rows_returned: 0,
            mem_tracker: None,
            log_output_rows: false,
            closed: false,
            profile,
            build_timer,
            probe_timer,
            total_timer,
            rows_returned_counter,
            _semantics: PhantomData,
        })
    }

    pub fn tuple_id(&self) -> TupleId {
        self.tuple_id
    }

    pub fn num_rows_returned(&self) -> usize {
        self.num_rows_returned
    }

    fn reached_limit(&self) -> bool {
        self.limit.is_some_and(|limit| self.num_rows_returned >= limit)
    }

    /// Table parameters pairing the anchor list with the list of `probe_child`.
    fn table_params(&self, probe_child: usize) -> HashTableParams {
        HashTableParams {
            arena: Arc::clone(&self.arena),
            build_exprs: self.child_expr_lists[0].clone(),
            probe_exprs: self.child_expr_lists[probe_child].clone(),
            key_types: self.key_types.clone(),
            tuple_byte_size: self.tuple_byte_size,
            dedup: true,
            find_nulls: self.find_nulls,
            node_id: self.id,
            mem_tracker: self.mem_tracker.clone(),
            initial_buckets: config::set_op_hash_table_buckets(),
        }
    }

    /// Replace the table with one holding only the entries the semantics keep, paired with
    /// the expressions of `probe_child`.
    fn rebuild_hash_table(&mut self, state: &RuntimeState, probe_child: usize) -> ExecResult<()> {
        state.check_cancelled()?;
        let params = self.table_params(probe_child);
        let Some(old) = self.hash_tbl.take() else {
            return Err(ExecError::internal(format!("{} rebuild without a table", self.name)));
        };
        let mut rebuilt = SetHashTable::new(params)?;
        for (copied, entry) in old.entry_ids().enumerate() {
            if copied % REBUILD_CANCEL_CHECK_INTERVAL == 0 {
                state.check_cancelled()?;
            }
            if S::keep_on_rebuild(old.is_matched(entry)) {
                rebuilt.insert_from(&old, entry)?;
            }
        }
        debug!(
            node = %self.name,
            probe_child,
            before = old.size(),
            after = rebuilt.size(),
            "rebuilt set operation hash table"
        );
        drop(old);
        self.hash_tbl = Some(rebuilt);
        Ok(())
    }

    fn open_impl(&mut self, state: &RuntimeState) -> ExecResult<()> {
        state.check_cancelled()?;
        self.log_output_rows = config::debug_exec_node_output();
        self.mem_tracker = state
            .mem_tracker()
            .map(|parent| MemTracker::new_child(self.name.clone(), &parent));

        {
            let _timer = ScopedTimer::new(Arc::clone(&self.build_timer));
            let params = self.table_params(1);
            let table =
                build_hash_table(state, self.children[0].as_mut(), params, S::BUILD_CONTEXT)?;
            self.hash_tbl = Some(table);
        }
        let anchor_size = self.hash_tbl.as_ref().map(|t| t.size()).unwrap_or(0);
        debug!(node = %self.name, anchor_size, "built set operation hash table");
        if anchor_size == 0 {
            self.iter = HashTableIter::default();
            return Ok(());
        }

        for child_idx in 1..self.children.len() {
            if child_idx > 1 {
                let _timer = ScopedTimer::new(Arc::clone(&self.build_timer));
                self.rebuild_hash_table(state, child_idx)?;
            }
            let surviving = {
                let _timer = ScopedTimer::new(Arc::clone(&self.probe_timer));
                let Some(table) = self.hash_tbl.as_mut() else {
                    return Err(ExecError::internal(format!("{} lost its table", self.name)));
                };
                let probed = probe_hash_table(
                    state,
                    self.children[child_idx].as_mut(),
                    table,
                    S::PROBE_CONTEXT,
                )?;
                let surviving = S::surviving(table);
                debug!(
                    node = %self.name,
                    child_idx,
                    probed,
                    matched = table.num_matched(),
                    surviving,
                    "probed set operation child"
                );
                surviving
            };
            if surviving == 0 {
                debug!(
                    node = %self.name,
                    child_idx,
                    "no surviving rows, skipping remaining children"
                );
                break;
            }
        }
        self.iter = self
            .hash_tbl
            .as_ref()
            .map(|t| t.begin())
            .unwrap_or_default();
        Ok(())
    }

    fn get_next_impl(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        state.check_cancelled()?;
        batch.reset();
        if self.reached_limit() {
            return Ok(true);
        }
        let Some(table) = self.hash_tbl.as_ref() else {
            return Err(ExecError::internal(format!(
                "{} get_next called before open",
                self.name
            )));
        };
        batch.resize_and_allocate_tuple_buffer()?;
        let mut eos = !self.iter.has_next();
        while self.iter.has_next() {
            let entry = self.iter.entry();
            if S::emit(table.is_matched(entry)) {
                batch.push_tuple(entry, table.row(entry)?.len())?;
                self.num_rows_returned += 1;
                if self.log_output_rows {
                    trace!(node = %self.name, entry = entry.index(), "output row");
                }
            }
            self.iter.advance();
            eos = !self.iter.has_next() || self.reached_limit();
            if batch.is_full() || batch.at_resource_limit() || eos {
                break;
            }
        }
        let columns = table.materialize(batch.tuples())?;
        let chunk = Chunk::from_columns(&self.output_slots, columns, batch.tuples().len())?;
        batch.set_chunk(chunk);
        self.rows_returned_counter
            .set(i64::try_from(self.num_rows_returned).unwrap_or(i64::MAX));
        Ok(eos)
    }
}

/// Open `child`, drain it into a new deduplicating table, and close it.
///
/// Cancellation is checked before every pull and the memory limit after every pull.
pub fn build_hash_table(
    state: &RuntimeState,
    child: &mut dyn ExecNode,
    params: HashTableParams,
    context: &str,
) -> ExecResult<SetHashTable> {
    let mut table = SetHashTable::new(params)?;
    child.open(state)?;
    let mut batch = RowBatch::for_state(state);
    loop {
        state.check_cancelled()?;
        let eos = child.get_next(state, &mut batch)?;
        state.check_mem_limit(context)?;
        if let Some(chunk) = batch.chunk().filter(|c| !c.is_empty()) {
            let keys = table.build_keys(chunk)?;
            for row in 0..keys.num_rows() {
                table.insert(&keys, row)?;
            }
        }
        batch.reset();
        if eos {
            break;
        }
    }
    child.close(state);
    Ok(table)
}

/// Open `child` and mark every table entry it contains. Returns the number of rows read.
fn probe_hash_table(
    state: &RuntimeState,
    child: &mut dyn ExecNode,
    table: &mut SetHashTable,
    context: &str,
) -> ExecResult<u64> {
    child.open(state)?;
    let mut batch = RowBatch::for_state(state);
    let mut rows_read: u64 = 0;
    loop {
        state.check_cancelled()?;
        let eos = child.get_next(state, &mut batch)?;
        state.check_mem_limit(context)?;
        if let Some(chunk) = batch.chunk().filter(|c| !c.is_empty()) {
            rows_read += chunk.len() as u64;
            if let Some(limit) = state.probe_row_limit() {
                if rows_read > limit {
                    return Err(ExecError::RowLimitExceeded(format!(
                        "{context} (rows={rows_read}, limit={limit})"
                    )));
                }
            }
            let keys = table.probe_keys(chunk)?;
            for row in 0..keys.num_rows() {
                if let Some(entry) = table.find(&keys, row) {
                    table.set_matched(entry);
                }
            }
        }
        batch.reset();
        if eos {
            break;
        }
    }
    child.close(state);
    Ok(rows_read)
}

impl<S: SetOpSemantics> ExecNode for SetOpNode<S> {
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

    fn open(&mut self, state: &RuntimeState) -> ExecResult<()> {
        let _timer = ScopedTimer::new(Arc::clone(&self.total_timer));
        self.open_impl(state).inspect_err(|e| {
            if !e.is_cancelled() {
                state.error_state().set_error(e.clone());
            }
        })
    }

    fn get_next(&mut self, state: &RuntimeState, batch: &mut RowBatch) -> ExecResult<bool> {
        let _timer = ScopedTimer::new(Arc::clone(&self.total_timer));
        self.get_next_impl(state, batch)
    }

    fn close(&mut self, state: &RuntimeState) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut table) = self.hash_tbl.take() {
            table.close();
        }
        for child in self.children.iter_mut() {
            child.close(state);
        }
        self.rows_returned_counter
            .set(i64::try_from(self.num_rows_returned).unwrap_or(i64::MAX));
        debug!(
            node = %self.name,
            rows_returned = self.num_rows_returned,
            "set operation node closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::PrimitiveType;
    use crate::exec::node::except::ExceptSemantics;
    use crate::exec::node::values::ValuesNode;
    use arrow::array::Int32Array;

    fn values(node_id: i32, slot: u32, rows: Vec<i32>) -> BoxedExecNode {
        Box::new(
            ValuesNode::from_columns(
                node_id,
                vec![SlotId::new(slot)],
                vec![Arc::new(Int32Array::from(rows))],
            )
            .expect("values"),
        )
    }

    fn desc(num_children: usize) -> SetOperationNodeDesc {
        SetOperationNodeDesc {
            node_id: 7,
            tuple_id: TupleId(1),
            output_slots: vec![SlotId::new(100)],
            result_expr_lists: (0..num_children)
                .map(|i| vec![ExprDesc::slot(i as u32 + 1, PrimitiveType::Int)])
                .collect(),
            find_nulls: true,
            limit: None,
        }
    }

    #[test]
    fn desc_parses_from_json() {
        let desc = SetOperationNodeDesc::from_json(
            r#"{
                "node_id": 3,
                "tuple_id": 2,
                "output_slots": [10],
                "result_expr_lists": [
                    [{"kind": "slot_ref", "slot_id": 1, "type": "INT"}],
                    [{"kind": "slot_ref", "slot_id": 2, "type": "INT"}]
                ],
                "limit": 5
            }"#,
        )
        .expect("parse");
        assert!(desc.find_nulls);
        assert_eq!(desc.limit, Some(5));
        assert_eq!(desc.result_expr_lists.len(), 2);
        let kind: SetOpKind = serde_json::from_str("\"INTERSECT\"").expect("kind");
        assert_eq!(kind, SetOpKind::Intersect);
    }

    #[test]
    fn negative_limit_is_unlimited() {
        let mut d = desc(2);
        d.limit = Some(-1);
        let node = SetOpNode::<ExceptSemantics>::new(
            d,
            vec![values(1, 1, vec![1]), values(2, 2, vec![2])],
        )
        .expect("node");
        assert!(node.limit.is_none());
        assert_eq!(node.name(), "EXCEPT_NODE (id=7)");
        assert_eq!(node.tuple_byte_size, 5);
    }

    #[test]
    fn rebuild_keeps_only_unmatched_entries() {
        let state = RuntimeState::default();
        let mut node = SetOpNode::<ExceptSemantics>::new(
            desc(3),
            vec![
                values(1, 1, vec![1, 2, 3, 4]),
                values(2, 2, vec![2]),
                values(3, 3, vec![3]),
            ],
        )
        .expect("node");
        let params = node.table_params(1);
        let mut anchor = Box::new(ValuesNode::from_columns(
            1,
            vec![SlotId::new(1)],
            vec![Arc::new(Int32Array::from(vec![1, 2, 3, 4]))],
        )
        .expect("values"));
        let mut table =
            build_hash_table(&state, anchor.as_mut(), params, "test build").expect("build");
        let mut probe = values(2, 2, vec![2, 4]);
        probe_hash_table(&state, probe.as_mut(), &mut table, "test probe").expect("probe");
        assert_eq!(table.num_unmatched(), 2);

        node.hash_tbl = Some(table);
        node.rebuild_hash_table(&state, 2).expect("rebuild");
        let rebuilt = node.hash_tbl.as_ref().expect("table");
        assert_eq!(rebuilt.size(), 2);
        assert_eq!(rebuilt.num_matched(), 0);
        assert_eq!(rebuilt.params().probe_exprs, node.child_expr_lists[2]);
    }

    #[test]
    fn rebuild_observes_cancellation() {
        let state = RuntimeState::default();
        let mut node = SetOpNode::<ExceptSemantics>::new(
            desc(3),
            vec![
                values(1, 1, vec![1, 2, 3]),
                values(2, 2, vec![2]),
                values(3, 3, vec![3]),
            ],
        )
        .expect("node");
        let params = node.table_params(1);
        let mut anchor = values(1, 1, vec![1, 2, 3]);
        let table =
            build_hash_table(&state, anchor.as_mut(), params, "test build").expect("build");
        node.hash_tbl = Some(table);

        state.cancel();
        let err = node.rebuild_hash_table(&state, 2).expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
