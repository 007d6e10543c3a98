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
//! Keyed hash table backing the EXCEPT / INTERSECT exec nodes.
//!
//! Keys are the values of a per-side expression list, encoded with Arrow's row format so a
//! stored tuple is a self-contained byte string. Entries live in an append-only arena and are
//! addressed by `EntryId`; the hashbrown index only maps hashes to arena positions. Each entry
//! carries a `matched` flag that can only flip from false to true.

use std::mem::size_of;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::buffer::NullBuffer;
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, Rows, SortField};
use hashbrown::{DefaultHashBuilder, HashTable};

use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::hash_table::hash::{hash_bytes_with_seed, seed_from_hasher};
use crate::runtime::mem_tracker::MemTracker;

/// Construction parameters; a rebuild clones them and swaps in the next probe list.
#[derive(Clone, Debug)]
pub struct HashTableParams {
    pub arena: Arc<ExprArena>,
    /// Expressions evaluated on the anchor (child 0) side.
    pub build_exprs: Vec<ExprId>,
    /// Expressions evaluated on the side currently being probed.
    pub probe_exprs: Vec<ExprId>,
    /// Comparison column types. Both expression lists must already produce exactly these.
    pub key_types: Vec<DataType>,
    /// Estimated encoded bytes per tuple, used to pre-size row storage.
    pub tuple_byte_size: usize,
    /// Set-operation mode: equal keys collapse into one entry. Otherwise they are chained
    /// behind the first entry and reachable through `duplicates`, as a join build needs.
    pub dedup: bool,
    /// Whether NULL compares equal to NULL.
    pub find_nulls: bool,
    pub node_id: i32,
    pub mem_tracker: Option<Arc<MemTracker>>,
    pub initial_buckets: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    offset: usize,
    len: usize,
    hash: u64,
    matched: bool,
    has_null: bool,
    next_dup: Option<EntryId>,
}

/// Encoded keys of one chunk, produced by `build_keys` / `probe_keys`.
#[derive(Debug)]
pub struct KeyRows {
    rows: Rows,
    nulls: Option<NullBuffer>,
}

impl KeyRows {
    pub fn num_rows(&self) -> usize {
        self.rows.num_rows()
    }

    /// Whether any comparison column of `row` is NULL.
    pub fn has_null(&self, row: usize) -> bool {
        self.nulls.as_ref().is_some_and(|n| n.is_null(row))
    }
}

/// Output cursor over the entry arena, in insertion order.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HashTableIter {
    pos: usize,
    end: usize,
}

impl HashTableIter {
    pub fn has_next(&self) -> bool {
        self.pos < self.end
    }

    pub fn advance(&mut self) {
        if self.pos < self.end {
            self.pos += 1;
        }
    }

    pub fn entry(&self) -> EntryId {
        EntryId(self.pos)
    }
}

pub struct SetHashTable {
    params: HashTableParams,
    converter: RowConverter,
    hash_seed: u64,
    index: HashTable<EntryId>,
    entries: Vec<Entry>,
    row_data: Vec<u8>,
    num_matched: usize,
    mem_tracker: Option<Arc<MemTracker>>,
    tracked_bytes: usize,
}

impl SetHashTable {
    pub fn new(params: HashTableParams) -> ExecResult<Self> {
        if params.build_exprs.len() != params.key_types.len()
            || params.probe_exprs.len() != params.key_types.len()
        {
            return Err(ExecError::internal(format!(
                "hash table key arity mismatch: build={} probe={} key_types={}",
                params.build_exprs.len(),
                params.probe_exprs.len(),
                params.key_types.len()
            )));
        }
        for (side, exprs) in [("build", &params.build_exprs), ("probe", &params.probe_exprs)] {
            for (col, (expr, key_type)) in exprs.iter().zip(params.key_types.iter()).enumerate() {
                let expr_type = params.arena.data_type(*expr);
                if expr_type != Some(key_type) {
                    return Err(ExecError::init(format!(
                        "hash table {side} key {col} has type {expr_type:?}, expected {key_type:?}"
                    )));
                }
            }
        }
        let fields = params
            .key_types
            .iter()
            .cloned()
            .map(SortField::new)
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields)?;
        let mem_tracker = params.mem_tracker.as_ref().map(|parent| {
            MemTracker::new_child(format!("SetHashTable (node={})", params.node_id), parent)
        });
        let buckets = params.initial_buckets.max(1);
        let mut table = Self {
            converter,
            hash_seed: seed_from_hasher(&DefaultHashBuilder::default()),
            index: HashTable::with_capacity(buckets),
            entries: Vec::with_capacity(buckets),
            row_data: Vec::with_capacity(buckets.saturating_mul(params.tuple_byte_size)),
            num_matched: 0,
            mem_tracker,
            tracked_bytes: 0,
            params,
        };
        table.update_mem_usage();
        Ok(table)
    }

    pub fn params(&self) -> &HashTableParams {
        &self.params
    }

    pub fn key_types(&self) -> &[DataType] {
        &self.params.key_types
    }

    pub fn build_keys(&self, chunk: &Chunk) -> ExecResult<KeyRows> {
        self.encode_keys(&self.params.build_exprs, chunk)
    }

    pub fn probe_keys(&self, chunk: &Chunk) -> ExecResult<KeyRows> {
        self.encode_keys(&self.params.probe_exprs, chunk)
    }

    fn encode_keys(&self, exprs: &[ExprId], chunk: &Chunk) -> ExecResult<KeyRows> {
        let mut arrays = Vec::with_capacity(exprs.len());
        for (expr, key_type) in exprs.iter().zip(self.params.key_types.iter()) {
            let array = self.params.arena.eval(*expr, chunk)?;
            if array.len() != chunk.len() {
                return Err(ExecError::internal(format!(
                    "key expression returned {} rows for a chunk of {}",
                    array.len(),
                    chunk.len()
                )));
            }
            if array.data_type() != key_type {
                return Err(ExecError::internal(format!(
                    "key column has type {:?}, expected {:?}",
                    array.data_type(),
                    key_type
                )));
            }
            arrays.push(array);
        }
        let nulls = arrays.iter().fold(None, |acc: Option<NullBuffer>, array| {
            NullBuffer::union(acc.as_ref(), array.logical_nulls().as_ref())
        });
        let rows = self.converter.convert_columns(&arrays)?;
        Ok(KeyRows { rows, nulls })
    }

    /// Insert row `row` of `keys`; returns whether a new entry was created.
    pub fn insert(&mut self, keys: &KeyRows, row: usize) -> ExecResult<bool> {
        let key_row = keys.rows.row(row);
        self.insert_encoded(key_row.as_ref(), keys.has_null(row))
    }

    /// Copy `entry` of `other` into this table with a fresh `matched = false` flag.
    ///
    /// Both tables must share key types, which holds for a rebuild from the same build list.
    pub fn insert_from(&mut self, other: &SetHashTable, entry: EntryId) -> ExecResult<bool> {
        if other.key_types() != self.key_types() {
            return Err(ExecError::internal(
                "cannot copy entries between hash tables with different key types",
            ));
        }
        let source = other.entry_ref(entry)?;
        self.insert_encoded(other.bytes_of(source), source.has_null)
    }

    fn insert_encoded(&mut self, bytes: &[u8], has_null: bool) -> ExecResult<bool> {
        let hash = hash_bytes_with_seed(self.hash_seed, bytes);
        if has_null && !self.params.find_nulls {
            // Never reachable through `find`, and never collapsed with another NULL row.
            self.push_entry(bytes, hash, true)?;
            return Ok(true);
        }
        match self.lookup(hash, bytes) {
            Some(_) if self.params.dedup => Ok(false),
            Some(head) => {
                let id = self.push_entry(bytes, hash, has_null)?;
                let head_next = self.entries[head.0].next_dup;
                self.entries[id.0].next_dup = head_next;
                self.entries[head.0].next_dup = Some(id);
                Ok(true)
            }
            None => {
                let id = self.push_entry(bytes, hash, has_null)?;
                let entries = &self.entries;
                self.index.insert_unique(hash, id, |e| entries[e.0].hash);
                self.update_mem_usage();
                Ok(true)
            }
        }
    }

    fn push_entry(&mut self, bytes: &[u8], hash: u64, has_null: bool) -> ExecResult<EntryId> {
        let alloc_failed = |e: std::collections::TryReserveError| {
            ExecError::AllocFailed(format!(
                "set hash table (node={}) could not grow: {}",
                self.params.node_id, e
            ))
        };
        self.row_data.try_reserve(bytes.len()).map_err(alloc_failed)?;
        self.entries.try_reserve(1).map_err(alloc_failed)?;
        let id = EntryId(self.entries.len());
        self.entries.push(Entry {
            offset: self.row_data.len(),
            len: bytes.len(),
            hash,
            matched: false,
            has_null,
            next_dup: None,
        });
        self.row_data.extend_from_slice(bytes);
        self.update_mem_usage();
        Ok(id)
    }

    fn lookup(&self, hash: u64, bytes: &[u8]) -> Option<EntryId> {
        self.index
            .find(hash, |id| {
                let entry = &self.entries[id.0];
                entry.hash == hash && self.bytes_of(entry) == bytes
            })
            .copied()
    }

    /// First entry whose key equals row `row` of `keys`, under the table's null policy.
    pub fn find(&self, keys: &KeyRows, row: usize) -> Option<EntryId> {
        if !self.params.find_nulls && keys.has_null(row) {
            return None;
        }
        let key_row = keys.rows.row(row);
        let bytes = key_row.as_ref();
        self.lookup(hash_bytes_with_seed(self.hash_seed, bytes), bytes)
    }

    /// Entries sharing the key of `head`, `head` included. Only non-dedup tables chain.
    pub fn duplicates(&self, head: EntryId) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(Some(head), move |id| {
            self.entries.get(id.0).and_then(|e| e.next_dup)
        })
    }

    pub fn begin(&self) -> HashTableIter {
        HashTableIter {
            pos: 0,
            end: self.entries.len(),
        }
    }

    pub fn end(&self) -> HashTableIter {
        HashTableIter {
            pos: self.entries.len(),
            end: self.entries.len(),
        }
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = EntryId> + use<> {
        (0..self.entries.len()).map(EntryId)
    }

    fn entry_ref(&self, entry: EntryId) -> ExecResult<&Entry> {
        self.entries.get(entry.0).ok_or_else(|| {
            ExecError::internal(format!(
                "entry {} out of range (size={})",
                entry.0,
                self.entries.len()
            ))
        })
    }

    fn bytes_of(&self, entry: &Entry) -> &[u8] {
        &self.row_data[entry.offset..entry.offset + entry.len]
    }

    /// Encoded key bytes of `entry`.
    pub fn row(&self, entry: EntryId) -> ExecResult<&[u8]> {
        Ok(self.bytes_of(self.entry_ref(entry)?))
    }

    pub fn is_matched(&self, entry: EntryId) -> bool {
        self.entries.get(entry.0).is_some_and(|e| e.matched)
    }

    /// Mark `entry` as seen; returns true only on the first call for that entry.
    pub fn set_matched(&mut self, entry: EntryId) -> bool {
        match self.entries.get_mut(entry.0) {
            Some(e) if !e.matched => {
                e.matched = true;
                self.num_matched += 1;
                true
            }
            _ => false,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn num_matched(&self) -> usize {
        self.num_matched
    }

    pub fn num_unmatched(&self) -> usize {
        self.entries.len() - self.num_matched
    }

    /// Decode `entries` back into one column per key, in the given order.
    pub fn materialize(&self, entries: &[EntryId]) -> ExecResult<Vec<ArrayRef>> {
        let parser = self.converter.parser();
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            rows.push(parser.parse(self.row(*entry)?));
        }
        Ok(self.converter.convert_rows(rows)?)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.row_data.capacity()
            + self.entries.capacity() * size_of::<Entry>()
            + self.index.capacity() * size_of::<EntryId>()
    }

    fn update_mem_usage(&mut self) {
        let Some(tracker) = self.mem_tracker.as_ref() else {
            return;
        };
        let now = self.allocated_bytes();
        if now > self.tracked_bytes {
            tracker.consume((now - self.tracked_bytes) as i64);
        } else if now < self.tracked_bytes {
            tracker.release((self.tracked_bytes - now) as i64);
        }
        self.tracked_bytes = now;
    }

    /// Drop all entries and return their memory to the tracker. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.index = HashTable::new();
        self.entries = Vec::new();
        self.row_data = Vec::new();
        self.num_matched = 0;
        self.update_mem_usage();
    }
}

impl Drop for SetHashTable {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SetHashTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetHashTable")
            .field("node_id", &self.params.node_id)
            .field("size", &self.entries.len())
            .field("num_matched", &self.num_matched)
            .field("tracked_bytes", &self.tracked_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::expr::ExprNode;
    use arrow::array::{Int32Array, Int64Array, StringArray};

    fn params(find_nulls: bool, dedup: bool) -> HashTableParams {
        let mut arena = ExprArena::default();
        let build = arena.push_typed(ExprNode::SlotId(SlotId::new(1)), DataType::Int64);
        let probe_slot = arena.push_typed(ExprNode::SlotId(SlotId::new(2)), DataType::Int32);
        let probe = arena.push_typed(ExprNode::Cast(probe_slot), DataType::Int64);
        HashTableParams {
            arena: Arc::new(arena),
            build_exprs: vec![build],
            probe_exprs: vec![probe],
            key_types: vec![DataType::Int64],
            tuple_byte_size: 9,
            dedup,
            find_nulls,
            node_id: 1,
            mem_tracker: None,
            initial_buckets: 16,
        }
    }

    fn build_chunk(values: Vec<Option<i64>>) -> Chunk {
        Chunk::from_columns(&[SlotId::new(1)], vec![Arc::new(Int64Array::from(values))], 0)
            .expect("chunk")
    }

    fn probe_chunk(values: Vec<Option<i32>>) -> Chunk {
        Chunk::from_columns(&[SlotId::new(2)], vec![Arc::new(Int32Array::from(values))], 0)
            .expect("chunk")
    }

    fn insert_all(table: &mut SetHashTable, chunk: &Chunk) -> usize {
        let keys = table.build_keys(chunk).expect("keys");
        let mut inserted = 0;
        for row in 0..keys.num_rows() {
            if table.insert(&keys, row).expect("insert") {
                inserted += 1;
            }
        }
        inserted
    }

    #[test]
    fn dedup_collapses_equal_keys() {
        let mut table = SetHashTable::new(params(true, true)).expect("table");
        let inserted = insert_all(&mut table, &build_chunk(vec![Some(1), Some(2), Some(1)]));
        assert_eq!(inserted, 2);
        assert_eq!(table.size(), 2);
        assert_eq!(table.num_unmatched(), 2);
    }

    #[test]
    fn probe_cast_expression_matches_wider_keys() {
        let mut table = SetHashTable::new(params(true, true)).expect("table");
        insert_all(&mut table, &build_chunk(vec![Some(1), Some(2), Some(3)]));
        let probe = table.probe_keys(&probe_chunk(vec![Some(2), Some(9)])).expect("keys");
        let hit = table.find(&probe, 0).expect("2 is present");
        assert!(table.find(&probe, 1).is_none());
        assert!(table.set_matched(hit));
        assert!(!table.set_matched(hit));
        assert!(table.is_matched(hit));
        assert_eq!(table.num_matched(), 1);
        assert_eq!(table.num_unmatched(), 2);
    }

    #[test]
    fn null_equals_null_when_find_nulls() {
        let mut table = SetHashTable::new(params(true, true)).expect("table");
        assert_eq!(insert_all(&mut table, &build_chunk(vec![None, None])), 1);
        let probe = table.probe_keys(&probe_chunk(vec![None])).expect("keys");
        assert!(probe.has_null(0));
        assert!(table.find(&probe, 0).is_some());
    }

    #[test]
    fn null_never_matches_without_find_nulls() {
        let mut table = SetHashTable::new(params(false, true)).expect("table");
        assert_eq!(insert_all(&mut table, &build_chunk(vec![None, None, Some(4)])), 3);
        let probe = table.probe_keys(&probe_chunk(vec![None, Some(4)])).expect("keys");
        assert!(table.find(&probe, 0).is_none());
        assert!(table.find(&probe, 1).is_some());
    }

    #[test]
    fn non_dedup_chains_duplicates() {
        let mut table = SetHashTable::new(params(true, false)).expect("table");
        insert_all(&mut table, &build_chunk(vec![Some(5), Some(5), Some(6), Some(5)]));
        assert_eq!(table.size(), 4);
        let probe = table.probe_keys(&probe_chunk(vec![Some(5)])).expect("keys");
        let head = table.find(&probe, 0).expect("head");
        assert_eq!(table.duplicates(head).count(), 3);
    }

    #[test]
    fn iterate_and_materialize_in_insertion_order() {
        let mut table = SetHashTable::new(params(true, true)).expect("table");
        insert_all(&mut table, &build_chunk(vec![Some(30), Some(10), None, Some(20)]));
        let mut ids = Vec::new();
        let mut it = table.begin();
        while it.has_next() {
            ids.push(it.entry());
            it.advance();
        }
        assert_eq!(it, table.end());
        let cols = table.materialize(&ids).expect("materialize");
        let values = cols[0]
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        assert_eq!(
            values.iter().collect::<Vec<_>>(),
            vec![Some(30), Some(10), None, Some(20)]
        );
    }

    #[test]
    fn rebuild_copies_selected_entries() {
        let mut first = SetHashTable::new(params(true, true)).expect("table");
        insert_all(&mut first, &build_chunk(vec![Some(1), Some(2), Some(3)]));
        let probe = first.probe_keys(&probe_chunk(vec![Some(2)])).expect("keys");
        let hit = first.find(&probe, 0).expect("hit");
        first.set_matched(hit);

        let mut second = SetHashTable::new(first.params().clone()).expect("table");
        for id in first.entry_ids() {
            if !first.is_matched(id) {
                second.insert_from(&first, id).expect("copy");
            }
        }
        assert_eq!(second.size(), 2);
        assert_eq!(second.num_matched(), 0);
        let probe = second.probe_keys(&probe_chunk(vec![Some(2)])).expect("keys");
        assert!(second.find(&probe, 0).is_none());
    }

    #[test]
    fn memory_is_tracked_and_released() {
        let root = MemTracker::new_root("test_root");
        let mut p = params(true, true);
        p.mem_tracker = Some(Arc::clone(&root));
        let mut table = SetHashTable::new(p).expect("table");
        insert_all(&mut table, &build_chunk((0..100).map(Some).collect()));
        assert!(root.current() > 0);
        assert_eq!(root.current(), table.allocated_bytes() as i64);
        table.close();
        assert_eq!(root.current(), 0);
        table.close();
        assert_eq!(root.current(), 0);
    }

    #[test]
    fn string_keys_roundtrip() {
        let mut arena = ExprArena::default();
        let slot = arena.push_typed(ExprNode::SlotId(SlotId::new(1)), DataType::Utf8);
        let mut table = SetHashTable::new(HashTableParams {
            arena: Arc::new(arena),
            build_exprs: vec![slot],
            probe_exprs: vec![slot],
            key_types: vec![DataType::Utf8],
            tuple_byte_size: 16,
            dedup: true,
            find_nulls: true,
            node_id: 2,
            mem_tracker: None,
            initial_buckets: 4,
        })
        .expect("table");
        let chunk = Chunk::from_columns(
            &[SlotId::new(1)],
            vec![Arc::new(StringArray::from(vec!["b", "a", "b"]))],
            0,
        )
        .expect("chunk");
        assert_eq!(insert_all(&mut table, &chunk), 2);
        let ids = table.entry_ids().collect::<Vec<_>>();
        let cols = table.materialize(&ids).expect("materialize");
        let strings = cols[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(strings.value(0), "b");
        assert_eq!(strings.value(1), "a");
    }

    #[test]
    fn probe_expression_of_other_type_is_rejected() {
        let mut arena = ExprArena::default();
        let build = arena.push_typed(ExprNode::SlotId(SlotId::new(1)), DataType::Int32);
        let probe = arena.push_typed(ExprNode::SlotId(SlotId::new(2)), DataType::Float64);
        let err = SetHashTable::new(HashTableParams {
            arena: Arc::new(arena),
            build_exprs: vec![build],
            probe_exprs: vec![probe],
            key_types: vec![DataType::Int32],
            tuple_byte_size: 5,
            dedup: true,
            find_nulls: true,
            node_id: 3,
            mem_tracker: None,
            initial_buckets: 4,
        })
        .expect_err("double probe key against int keys");
        assert!(matches!(err, ExecError::Init(ref m) if m.contains("probe key 0")));
    }

    #[test]
    fn column_not_matching_declared_type_fails() {
        let table = SetHashTable::new(params(true, true)).expect("table");
        // Slot 1 is declared BIGINT but the chunk carries INT values.
        let chunk = Chunk::from_columns(
            &[SlotId::new(1)],
            vec![Arc::new(Int32Array::from(vec![1, 2]))],
            0,
        )
        .expect("chunk");
        let err = table.build_keys(&chunk).expect_err("type mismatch");
        assert!(matches!(err, ExecError::Internal(_)));
    }
}
