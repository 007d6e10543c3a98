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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = NovaRocksConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config was not installed"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("novarocks.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_setop=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Filter expression handed to the logging subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Rows per chunk when the query options do not carry a batch size.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Soft byte budget of one output chunk.
    #[serde(default = "default_chunk_bytes_limit")]
    pub chunk_bytes_limit: usize,
    /// Initial bucket hint for set-operation hash tables.
    #[serde(default = "default_set_op_hash_table_buckets")]
    pub set_op_hash_table_buckets: usize,
    /// Per-query memory limit in bytes; negative disables the check.
    #[serde(default = "default_query_mem_limit_bytes")]
    pub query_mem_limit_bytes: i64,
}

fn default_chunk_size() -> usize {
    4096
}
fn default_chunk_bytes_limit() -> usize {
    8 * 1024 * 1024
}
fn default_set_op_hash_table_buckets() -> usize {
    1024
}
fn default_query_mem_limit_bytes() -> i64 {
    -1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_bytes_limit: default_chunk_bytes_limit(),
            set_op_hash_table_buckets: default_set_op_hash_table_buckets(),
            query_mem_limit_bytes: default_query_mem_limit_bytes(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DebugConfig {
    /// Log every build/probe/output row of exec nodes at TRACE level.
    #[serde(default)]
    pub exec_node_output: bool,
}
