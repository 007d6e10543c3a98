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
//! Typed execution status for exec nodes.
//!
//! Every exec-node entry point returns `ExecResult<T>`. Failures are fatal for the node
//! instance and bubble up to the fragment executor unchanged.

use arrow::error::ArrowError;
use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    /// Plan description could not be turned into an executable node.
    #[error("init failed: {0}")]
    Init(String),

    /// Cooperative cancellation observed at a pull boundary.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("memory limit exceeded: {0}")]
    MemLimitExceeded(String),

    #[error("row limit exceeded: {0}")]
    RowLimitExceeded(String),

    #[error("allocation failed: {0}")]
    AllocFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Cancellation is not a data error; callers use this to avoid reporting it as one.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::MemLimitExceeded(_) | Self::RowLimitExceeded(_))
    }
}

impl From<ArrowError> for ExecError {
    fn from(e: ArrowError) -> Self {
        Self::Internal(format!("arrow error: {e}"))
    }
}
