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
use super::LiteralValue;
use crate::common::status::ExecResult;
use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, Float32Array,
    Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, NullArray, StringArray,
};
use std::sync::Arc;

pub fn eval(value: &LiteralValue, len: usize) -> ExecResult<ArrayRef> {
    let arr: ArrayRef = match value {
        LiteralValue::Null => Arc::new(NullArray::new(len)),
        LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
        LiteralValue::Int8(v) => Arc::new(Int8Array::from(vec![*v; len])),
        LiteralValue::Int16(v) => Arc::new(Int16Array::from(vec![*v; len])),
        LiteralValue::Int32(v) => Arc::new(Int32Array::from(vec![*v; len])),
        LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
        LiteralValue::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
        LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
        LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
        LiteralValue::Binary(v) => {
            let values = std::iter::repeat_n(v.as_slice(), len).collect::<Vec<&[u8]>>();
            Arc::new(BinaryArray::from_vec(values))
        }
        LiteralValue::Date32(v) => Arc::new(Date32Array::from(vec![*v; len])),
        LiteralValue::Decimal128 {
            value,
            precision,
            scale,
        } => Arc::new(
            Decimal128Array::from(vec![*value; len])
                .with_precision_and_scale(*precision, *scale)?,
        ),
    };
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use arrow::datatypes::DataType;

    #[test]
    fn literal_repeats_value() {
        let arr = eval(&LiteralValue::Utf8("x".to_string()), 4).expect("eval");
        let strings = arr.as_any().downcast_ref::<StringArray>().expect("utf8");
        assert_eq!(strings.len(), 4);
        assert!(strings.iter().all(|v| v == Some("x")));
    }

    #[test]
    fn decimal_literal_keeps_precision_and_scale() {
        let arr = eval(
            &LiteralValue::Decimal128 {
                value: 1234,
                precision: 10,
                scale: 2,
            },
            1,
        )
        .expect("eval");
        assert_eq!(arr.data_type(), &DataType::Decimal128(10, 2));
    }
}
