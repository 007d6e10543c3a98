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
mod cast;
pub mod desc;
mod literal;
mod slot;

use crate::common::ids::SlotId;
use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use arrow::array::{ArrayRef, new_null_array};
use arrow::datatypes::DataType;

pub use self::desc::{ExprDesc, PrimitiveType, compile_expr};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    Date32(i32),
    Decimal128 {
        value: i128,
        precision: u8,
        scale: i8,
    },
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Slot id coming from the plan's descriptor table.
    SlotId(SlotId),
    Cast(ExprId),
}

/// Flat storage for compiled expression trees; children always precede their parents.
#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    types: Vec<DataType>,
}

impl ExprArena {
    pub fn push(&mut self, node: ExprNode) -> ExprId {
        self.push_typed(node, DataType::Null)
    }

    pub fn push_typed(&mut self, node: ExprNode, data_type: DataType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        self.types.push(data_type);
        id
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.types.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn eval(&self, id: ExprId, chunk: &Chunk) -> ExecResult<ArrayRef> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| ExecError::internal(format!("invalid ExprId {}", id.0)))?;
        match node {
            ExprNode::Literal(v) => {
                let target_type = self.data_type(id).cloned().unwrap_or(DataType::Null);
                if matches!(v, LiteralValue::Null) {
                    return Ok(new_null_array(&target_type, chunk.len()));
                }
                let out = literal::eval(v, chunk.len())?;
                if matches!(target_type, DataType::Null) || out.data_type() == &target_type {
                    return Ok(out);
                }
                cast::cast_to(&out, &target_type).map_err(|e| {
                    ExecError::internal(format!(
                        "literal cast failed from {:?} to {:?}: {}",
                        out.data_type(),
                        target_type,
                        e
                    ))
                })
            }
            ExprNode::SlotId(slot_id) => slot::eval_slot_id(*slot_id, chunk),
            ExprNode::Cast(child) => cast::eval(self, id, *child, chunk),
        }
    }

    /// Evaluate a list of expressions against one chunk, in order.
    pub fn eval_all(&self, ids: &[ExprId], chunk: &Chunk) -> ExecResult<Vec<ArrayRef>> {
        ids.iter().map(|id| self.eval(*id, chunk)).collect()
    }
}
