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
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Unit of a profile counter, mirrors the BE counter units used by exec nodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TUnit {
    Unit,
    Bytes,
    TimeNs,
}

#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

#[derive(Debug)]
struct RuntimeProfileInner {
    name: String,
    counters: Mutex<HashMap<String, CounterRef>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: name.into(),
                counters: Mutex::new(HashMap::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Return the child named `name`, creating it on first use.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = children.iter().find(|c| c.name() == name) {
            return existing.clone();
        }
        let child = RuntimeProfile::new(name);
        children.push(child.clone());
        child
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut guard = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        let name = name.into();
        let mut guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = guard.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit));
        guard.insert(name, Arc::clone(&counter));
        counter
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TUnit::TimeNs)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    /// Render the profile tree, one counter per line, children indented.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}{}:", self.name());
        let info_strings = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (k, v) in info_strings {
            let _ = writeln!(out, "{indent}   - {k}: {v}");
        }
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect::<Vec<_>>();
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        for c in counters {
            let _ = writeln!(out, "{indent}   - {}: {}", c.name, c.display_value());
        }
        for child in self.children() {
            child.pretty_print_into(out, depth + 1);
        }
    }
}

pub type CounterRef = Arc<Counter>;

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: TUnit,
    value: AtomicI64,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: TUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> TUnit {
        self.unit
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    fn display_value(&self) -> String {
        let v = self.value();
        match self.unit {
            TUnit::Unit => v.to_string(),
            TUnit::Bytes => format!("{v} B"),
            TUnit::TimeNs if v >= 1_000_000 => format!("{:.3}ms", v as f64 / 1_000_000.0),
            TUnit::TimeNs => format!("{v}ns"),
        }
    }
}

/// Adds the elapsed wall time to its counter when dropped.
pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.counter.add(clamp_u128_to_i64(self.start.elapsed().as_nanos()));
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_counter_is_idempotent_by_name() {
        let profile = RuntimeProfile::new("EXCEPT_NODE (id=1)");
        let a = profile.add_counter("RowsReturned", TUnit::Unit);
        let b = profile.add_counter("RowsReturned", TUnit::Unit);
        a.add(3);
        assert_eq!(b.value(), 3);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn scoped_timer_accumulates_on_drop() {
        let profile = RuntimeProfile::new("node");
        {
            let _timer = profile.scoped_timer("BuildTime");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let timer = profile.get_counter("BuildTime").expect("timer");
        assert!(timer.value() > 0);
        assert_eq!(timer.unit(), TUnit::TimeNs);
    }

    #[test]
    fn pretty_print_lists_children_and_counters() {
        let profile = RuntimeProfile::new("root");
        profile.add_info_string("Kind", "EXCEPT");
        profile.child("child").add_counter("Rows", TUnit::Unit).set(5);
        let text = profile.pretty_print();
        assert!(text.starts_with("root:"));
        assert!(text.contains("   - Kind: EXCEPT"));
        assert!(text.contains("  child:"));
        assert!(text.contains("     - Rows: 5"));
    }

    #[test]
    fn child_returns_existing_profile() {
        let profile = RuntimeProfile::new("root");
        profile.child("a").add_counter("x", TUnit::Unit).set(1);
        assert_eq!(profile.children().len(), 1);
        let again = profile.child("a");
        assert_eq!(again.get_counter("x").map(|c| c.value()), Some(1));
    }
}
