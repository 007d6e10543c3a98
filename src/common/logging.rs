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
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::common::app_config::NovaRocksConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// glog-style line layout: `Lyyyymmdd hh:mm:ss.uuuuuu threadid file:line] message`.
struct GlogFormatter;

/// Appending log file shared by every event writer.
#[derive(Clone)]
struct LogFile(Arc<Mutex<fs::File>>);

impl LogFile {
    fn with_file<R>(&self, f: impl FnOnce(&mut fs::File) -> io::Result<R>) -> io::Result<R> {
        let mut file = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        f(&mut file)
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl io::Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| io::Write::write(file, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| io::Write::flush(file))
    }
}

/// Log file requested through the environment, if any.
///
/// `NOVAROCKS_LOG_FILE` names the file directly; `NOVAROCKS_LOG_DIR` places
/// `novarocks.log` inside the directory. Without either, logs go to stderr.
fn resolve_log_file_path() -> Option<PathBuf> {
    let non_empty = |key: &str| {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    if let Some(file) = non_empty("NOVAROCKS_LOG_FILE") {
        return Some(PathBuf::from(file));
    }
    non_empty("NOVAROCKS_LOG_DIR").map(|dir| PathBuf::from(dir).join("novarocks.log"))
}

fn open_log_file() -> Option<LogFile> {
    let path = resolve_log_file_path()?;
    let opened = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
    match opened {
        Ok(file) => Some(LogFile(Arc::new(Mutex::new(file)))),
        Err(err) => {
            eprintln!("cannot open log file {}: {err}, logging to stderr", path.display());
            None
        }
    }
}

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let level_char = match *metadata.level() {
            tracing::Level::ERROR => 'E',
            tracing::Level::WARN => 'W',
            tracing::Level::INFO => 'I',
            tracing::Level::DEBUG => 'D',
            tracing::Level::TRACE => 'T',
        };
        let timestamp = Local::now().format("%Y%m%d %H:%M:%S%.6f");
        let thread_id = format!("{:?}", std::thread::current().id())
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .parse::<u64>()
            .unwrap_or(0);

        write!(
            writer,
            "{}{} {} {}:{}] ",
            level_char,
            timestamp,
            thread_id,
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(level);

        if let Some(log_file) = open_log_file() {
            let _ = tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(log_file)
                .with_ansi(false)
                .event_format(GlogFormatter)
                .try_init();
            return;
        }

        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .event_format(GlogFormatter)
            .try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

/// Initialize from the loaded config, honoring `log_filter` over `log_level`.
pub fn init_from_config(config: &NovaRocksConfig) {
    init_with_level(config.effective_log_filter());
}

pub use tracing::{debug, error, info, trace, warn};
