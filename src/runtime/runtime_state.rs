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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::common::status::{ExecError, ExecResult};
use crate::common::types::UniqueId;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::mem_tracker::{self, MemTracker};

/// Per-query execution options handed to every fragment instance.
///
/// Unset fields fall back to the process config, then to built-in defaults.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    /// Maximum rows per chunk (StarRocks `batch_size`).
    pub batch_size: Option<i32>,
    /// Soft byte budget of one output chunk.
    pub chunk_bytes_limit: Option<usize>,
    /// Per-query memory limit in bytes.
    pub mem_limit: Option<i64>,
    /// Maximum rows a single exec node may read while probing one child.
    pub probe_row_limit: Option<u64>,
}

/// RuntimeState is a per-fragment-instance execution context, similar to StarRocks BE RuntimeState.
///
/// It supplies the batch size, the cancellation flag polled by exec nodes at every pull
/// boundary, and the fragment mem tracker used for limit checks.
#[derive(Debug)]
pub struct RuntimeState {
    query_options: QueryOptions,
    error_state: Arc<RuntimeErrorState>,
    cancelled: Arc<AtomicBool>,
    fragment_instance_id: Option<UniqueId>,
    mem_tracker: Option<Arc<MemTracker>>,
}

/// Latches the first error reported by any node of the fragment instance.
#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<ExecError>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: ExecError) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<ExecError> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(QueryOptions::default(), None, None)
    }
}

impl RuntimeState {
    /// Build the state for one fragment instance.
    ///
    /// Without an explicit tracker, a `process -> query -> fragment` chain is created when a
    /// memory limit is configured; the limit is attached to the query level.
    pub fn new(
        query_options: QueryOptions,
        fragment_instance_id: Option<UniqueId>,
        mem_tracker: Option<Arc<MemTracker>>,
    ) -> Self {
        let mem_tracker = mem_tracker.or_else(|| {
            let limit = query_options
                .mem_limit
                .or_else(config::query_mem_limit_bytes)?;
            let process = mem_tracker::process_mem_tracker();
            let fragment_label = fragment_instance_id
                .map(|id| id.short_label())
                .unwrap_or_else(|| "unknown".to_string());
            let query_tracker = MemTracker::new_child_with_limit(
                format!("query_{fragment_label}"),
                limit,
                &process,
            );
            Some(MemTracker::new_child(
                format!("fragment_{fragment_label}"),
                &query_tracker,
            ))
        });
        Self {
            query_options,
            error_state: Arc::new(RuntimeErrorState::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            fragment_instance_id,
            mem_tracker,
        }
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.query_options
    }

    pub fn fragment_instance_id(&self) -> Option<UniqueId> {
        self.fragment_instance_id
    }

    pub fn mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.mem_tracker.clone()
    }

    pub fn error_state(&self) -> Arc<RuntimeErrorState> {
        Arc::clone(&self.error_state)
    }

    pub fn error(&self) -> Option<ExecError> {
        self.error_state.error()
    }

    /// Return the maximum row count per in-memory chunk/RecordBatch.
    ///
    /// StarRocks BE uses `TQueryOptions.batch_size` (aka `RuntimeState::chunk_size()`).
    pub fn chunk_size(&self) -> usize {
        self.query_options
            .batch_size
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or_else(config::chunk_size)
            .max(1)
    }

    pub fn chunk_bytes_limit(&self) -> usize {
        self.query_options
            .chunk_bytes_limit
            .filter(|v| *v > 0)
            .unwrap_or_else(config::chunk_bytes_limit)
    }

    pub fn probe_row_limit(&self) -> Option<u64> {
        self.query_options.probe_row_limit
    }

    /// Handle that can cancel this fragment instance from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(
                finst_id = ?self.fragment_instance_id.map(|id| id.to_string()),
                "fragment instance cancelled"
            );
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self) -> ExecResult<()> {
        if self.is_cancelled() {
            return Err(ExecError::Cancelled(
                "fragment instance was cancelled".to_string(),
            ));
        }
        Ok(())
    }

    /// Fail when any tracker on the fragment's path exceeds its limit.
    pub fn check_mem_limit(&self, context: &str) -> ExecResult<()> {
        let Some(tracker) = self.mem_tracker.as_ref() else {
            return Ok(());
        };
        let Some(exceeded) = tracker.find_limit_exceeded() else {
            return Ok(());
        };
        let msg = format!(
            "{context} (tracker={}, limit={}, consumed={})",
            exceeded.label(),
            exceeded.limit(),
            exceeded.current()
        );
        warn!("memory limit exceeded: {}", msg);
        let err = ExecError::MemLimitExceeded(msg);
        self.error_state.set_error(err.clone());
        Err(err)
    }
}
