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
//! Serializable expression descriptions carried by a set-operation plan node.
//!
//! A plan ships one `ExprDesc` list per child; `compile_expr` lowers each tree into the
//! node's shared `ExprArena`, type-checking it on the way.

use arrow::datatypes::DataType;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::cast::can_cast;
use super::{ExprArena, ExprId, ExprNode, LiteralValue};
use crate::common::ids::SlotId;
use crate::common::status::{ExecError, ExecResult};

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;
const MAX_DECIMAL128_PRECISION: u8 = 38;

/// Column types a plan may declare for slots, literals and cast targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveType {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Varchar,
    Varbinary,
    Date,
    Decimal { precision: u8, scale: i8 },
}

impl PrimitiveType {
    pub fn to_arrow(self) -> DataType {
        match self {
            PrimitiveType::Boolean => DataType::Boolean,
            PrimitiveType::TinyInt => DataType::Int8,
            PrimitiveType::SmallInt => DataType::Int16,
            PrimitiveType::Int => DataType::Int32,
            PrimitiveType::BigInt => DataType::Int64,
            PrimitiveType::Float => DataType::Float32,
            PrimitiveType::Double => DataType::Float64,
            PrimitiveType::Varchar => DataType::Utf8,
            PrimitiveType::Varbinary => DataType::Binary,
            PrimitiveType::Date => DataType::Date32,
            PrimitiveType::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprDesc {
    SlotRef {
        slot_id: SlotId,
        #[serde(rename = "type")]
        data_type: PrimitiveType,
    },
    Literal {
        value: JsonValue,
        #[serde(rename = "type", default)]
        data_type: Option<PrimitiveType>,
    },
    Cast {
        child: Box<ExprDesc>,
        to: PrimitiveType,
    },
}

impl ExprDesc {
    pub fn slot(slot_id: u32, data_type: PrimitiveType) -> Self {
        ExprDesc::SlotRef {
            slot_id: SlotId::new(slot_id),
            data_type,
        }
    }

    pub fn literal(value: JsonValue, data_type: Option<PrimitiveType>) -> Self {
        ExprDesc::Literal { value, data_type }
    }

    pub fn cast(child: ExprDesc, to: PrimitiveType) -> Self {
        ExprDesc::Cast {
            child: Box::new(child),
            to,
        }
    }
}

/// Lower one expression tree into `arena`, returning the id of its root.
pub fn compile_expr(arena: &mut ExprArena, desc: &ExprDesc) -> ExecResult<ExprId> {
    match desc {
        ExprDesc::SlotRef { slot_id, data_type } => {
            Ok(arena.push_typed(ExprNode::SlotId(*slot_id), data_type.to_arrow()))
        }
        ExprDesc::Literal { value, data_type } => {
            let (literal, ty) = literal_from_json(value, *data_type)?;
            Ok(arena.push_typed(ExprNode::Literal(literal), ty))
        }
        ExprDesc::Cast { child, to } => {
            let child_id = compile_expr(arena, child)?;
            let from = arena
                .data_type(child_id)
                .cloned()
                .unwrap_or(DataType::Null);
            let target = to.to_arrow();
            if !can_cast(&from, &target) {
                return Err(ExecError::init(format!(
                    "unsupported cast from {:?} to {:?}",
                    from, target
                )));
            }
            Ok(arena.push_typed(ExprNode::Cast(child_id), target))
        }
    }
}

fn literal_from_json(
    value: &JsonValue,
    declared: Option<PrimitiveType>,
) -> ExecResult<(LiteralValue, DataType)> {
    let Some(ty) = declared.or_else(|| infer_type(value)) else {
        return Err(ExecError::init(format!(
            "literal {} has no declared type",
            value
        )));
    };
    if value.is_null() {
        return Ok((LiteralValue::Null, ty.to_arrow()));
    }
    let mismatch = || ExecError::init(format!("literal {} is not a valid {:?}", value, ty));
    let literal = match ty {
        PrimitiveType::Boolean => LiteralValue::Bool(value.as_bool().ok_or_else(mismatch)?),
        PrimitiveType::TinyInt => LiteralValue::Int8(int_in_range(value).ok_or_else(mismatch)?),
        PrimitiveType::SmallInt => {
            LiteralValue::Int16(int_in_range(value).ok_or_else(mismatch)?)
        }
        PrimitiveType::Int => LiteralValue::Int32(int_in_range(value).ok_or_else(mismatch)?),
        PrimitiveType::BigInt => LiteralValue::Int64(value.as_i64().ok_or_else(mismatch)?),
        PrimitiveType::Float => {
            LiteralValue::Float32(value.as_f64().ok_or_else(mismatch)? as f32)
        }
        PrimitiveType::Double => LiteralValue::Float64(value.as_f64().ok_or_else(mismatch)?),
        PrimitiveType::Varchar => {
            LiteralValue::Utf8(value.as_str().ok_or_else(mismatch)?.to_string())
        }
        PrimitiveType::Varbinary => {
            LiteralValue::Binary(value.as_str().ok_or_else(mismatch)?.as_bytes().to_vec())
        }
        PrimitiveType::Date => {
            let text = value.as_str().ok_or_else(mismatch)?;
            LiteralValue::Date32(parse_date(text).ok_or_else(mismatch)?)
        }
        PrimitiveType::Decimal { precision, scale } => {
            if precision == 0 || precision > MAX_DECIMAL128_PRECISION || scale < 0 {
                return Err(ExecError::init(format!(
                    "invalid decimal type precision={} scale={}",
                    precision, scale
                )));
            }
            let text = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                _ => return Err(mismatch()),
            };
            LiteralValue::Decimal128 {
                value: parse_decimal(&text, scale as u32).ok_or_else(mismatch)?,
                precision,
                scale,
            }
        }
    };
    Ok((literal, ty.to_arrow()))
}

fn infer_type(value: &JsonValue) -> Option<PrimitiveType> {
    match value {
        JsonValue::Bool(_) => Some(PrimitiveType::Boolean),
        JsonValue::Number(n) if n.is_i64() => Some(PrimitiveType::BigInt),
        JsonValue::Number(_) => Some(PrimitiveType::Double),
        JsonValue::String(_) => Some(PrimitiveType::Varchar),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn int_in_range<T: TryFrom<i64>>(value: &JsonValue) -> Option<T> {
    value.as_i64().and_then(|v| T::try_from(v).ok())
}

fn parse_date(text: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()?;
    Some(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
}

/// Parse `[-]digits[.digits]` into an unscaled integer with `scale` fractional digits.
fn parse_decimal(text: &str, scale: u32) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }
    if frac_part.len() > scale as usize {
        return None;
    }
    let mut unscaled: i128 = 0;
    for b in int_part.bytes().chain(frac_part.bytes()) {
        unscaled = unscaled.checked_mul(10)?.checked_add(i128::from(b - b'0'))?;
    }
    let pad = scale - frac_part.len() as u32;
    unscaled = unscaled.checked_mul(10i128.checked_pow(pad)?)?;
    Some(if negative { -unscaled } else { unscaled })
}
