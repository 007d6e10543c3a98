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
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::buffer::Buffer;
use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::common::ids::SlotId;
use crate::common::status::{ExecError, ExecResult};

/// A chunk of data, consisting of multiple rows.
///
/// Wraps an Arrow RecordBatch whose fields carry their slot id in metadata, so that
/// expressions resolve columns by slot rather than by position.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    slot_id_to_index: Arc<HashMap<SlotId, usize>>,
}

impl Chunk {
    pub fn try_new(batch: RecordBatch) -> ExecResult<Self> {
        let slot_id_to_index = slot_id_to_index_from_schema(batch.schema().as_ref())?;
        Ok(Self {
            batch,
            slot_id_to_index: Arc::new(slot_id_to_index),
        })
    }

    /// Build a chunk from parallel slot ids and columns.
    ///
    /// `num_rows` is only consulted when `columns` is empty.
    pub fn from_columns(
        slots: &[SlotId],
        columns: Vec<ArrayRef>,
        num_rows: usize,
    ) -> ExecResult<Self> {
        if slots.len() != columns.len() {
            return Err(ExecError::internal(format!(
                "chunk slot/column count mismatch: slots={} cols={}",
                slots.len(),
                columns.len()
            )));
        }
        let fields = columns
            .iter()
            .zip(slots.iter())
            .enumerate()
            .map(|(idx, (col, slot))| {
                let field = Field::new(format!("col_{}", idx), col.data_type().clone(), true);
                Arc::new(field_with_slot_id(field, *slot))
            })
            .collect::<Vec<_>>();
        let schema = Arc::new(Schema::new(fields));
        let batch = if columns.is_empty() {
            let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
            RecordBatch::try_new_with_options(schema, columns, &options)?
        } else {
            RecordBatch::try_new(schema, columns)?
        };
        Self::try_new(batch)
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_by_slot_id(&self, slot_id: SlotId) -> ExecResult<ArrayRef> {
        let idx = self
            .slot_id_to_index
            .get(&slot_id)
            .copied()
            .ok_or_else(|| {
                ExecError::internal(format!(
                    "slot id {} not found in chunk (num_columns={})",
                    slot_id,
                    self.batch.num_columns(),
                ))
            })?;
        self.batch.columns().get(idx).cloned().ok_or_else(|| {
            ExecError::internal(format!("slot id {} mapped to invalid index {}", slot_id, idx))
        })
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
            slot_id_to_index: Arc::clone(&self.slot_id_to_index),
        }
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            slot_id_to_index: Arc::new(HashMap::new()),
        }
    }
}

pub const FIELD_META_SLOT_ID: &str = "novarocks.slot_id";

pub fn field_with_slot_id(field: Field, slot_id: SlotId) -> Field {
    let mut meta = field.metadata().clone();
    meta.insert(FIELD_META_SLOT_ID.to_string(), slot_id.to_string());
    field.with_metadata(meta)
}

pub fn field_slot_id(field: &Field) -> ExecResult<Option<SlotId>> {
    let Some(v) = field.metadata().get(FIELD_META_SLOT_ID) else {
        return Ok(None);
    };
    let slot_id = v.parse::<SlotId>().map_err(ExecError::Internal)?;
    Ok(Some(slot_id))
}

fn slot_id_to_index_from_schema(schema: &Schema) -> ExecResult<HashMap<SlotId, usize>> {
    let mut map = HashMap::new();
    for (idx, f) in schema.fields().iter().enumerate() {
        let slot_id = field_slot_id(f.as_ref())?.ok_or_else(|| {
            ExecError::internal(format!(
                "missing {} in chunk schema field at index {} (name={})",
                FIELD_META_SLOT_ID,
                idx,
                f.name()
            ))
        })?;
        if map.insert(slot_id, idx).is_some() {
            return Err(ExecError::internal(format!(
                "duplicate slot id {} in chunk schema",
                slot_id
            )));
        }
    }
    Ok(map)
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within a single batch; slices sharing buffers across
/// batches are counted once per batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
