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
use crate::common::status::{ExecError, ExecResult};
use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprArena, ExprId};
use arrow::array::{Array, ArrayRef, new_null_array};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::DataType;

/// Whether a column of type `from` may be converted into `to`.
///
/// A `Null` column converts into anything.
pub fn can_cast(from: &DataType, to: &DataType) -> bool {
    from == to || matches!(from, DataType::Null) || can_cast_types(from, to)
}

pub(crate) fn cast_to(array: &ArrayRef, target_type: &DataType) -> ExecResult<ArrayRef> {
    if array.data_type() == target_type {
        return Ok(array.clone());
    }
    if matches!(array.data_type(), DataType::Null) {
        return Ok(new_null_array(target_type, array.len()));
    }
    // Values that do not fit become NULL instead of failing the query.
    let options = CastOptions {
        safe: true,
        ..Default::default()
    };
    Ok(cast_with_options(array, target_type, &options)?)
}

pub fn eval(arena: &ExprArena, id: ExprId, child: ExprId, chunk: &Chunk) -> ExecResult<ArrayRef> {
    let input = arena.eval(child, chunk)?;
    let target_type = arena
        .data_type(id)
        .cloned()
        .ok_or_else(|| ExecError::internal("cast target type missing"))?;
    cast_to(&input, &target_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn null_column_casts_to_any_type() {
        assert!(can_cast(&DataType::Null, &DataType::Date32));
        let arr: ArrayRef = Arc::new(arrow::array::NullArray::new(2));
        let out = cast_to(&arr, &DataType::Utf8).expect("cast");
        assert_eq!(out.data_type(), &DataType::Utf8);
        assert_eq!(out.null_count(), 2);
    }

    #[test]
    fn unparsable_string_becomes_null() {
        let arr: ArrayRef = Arc::new(StringArray::from(vec!["12", "abc"]));
        let out = cast_to(&arr, &DataType::Int32).expect("cast");
        let ints = out.as_any().downcast_ref::<Int32Array>().expect("int32");
        assert_eq!(ints.value(0), 12);
        assert!(ints.is_null(1));
    }
}
