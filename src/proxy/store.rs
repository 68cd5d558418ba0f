//! Synchronized store of checked records and derived statistics

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::proxy::parser::ProxyParser;
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

/// Append-only collection of checked records.
///
/// All queries return point-in-time snapshots and are safe to call while
/// a verification pass is still appending.
#[derive(Default)]
pub struct ResultStore {
    records: Mutex<Vec<ProxyRecord>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one checked record, keeping check-completion order.
    pub fn push(&self, record: ProxyRecord) {
        self.lock().push(record);
    }

    /// Snapshot of every checked record
    pub fn all(&self) -> Vec<ProxyRecord> {
        self.lock().clone()
    }

    /// Snapshot of the valid records, in check order
    pub fn valid(&self) -> Vec<ProxyRecord> {
        self.lock().iter().filter(|r| r.valid).cloned().collect()
    }

    /// Valid records of the given kind
    pub fn by_type(&self, kind: ProxyType) -> Vec<ProxyRecord> {
        self.lock()
            .iter()
            .filter(|r| r.valid && r.kind == kind)
            .cloned()
            .collect()
    }

    /// Up to `limit` valid records, fastest first. The sort is stable, so
    /// latency ties keep their original check order.
    pub fn fastest(&self, limit: usize) -> Vec<ProxyRecord> {
        let mut fastest = self.valid();
        fastest.sort_by_key(|r| r.latency_ms);
        fastest.truncate(limit);
        fastest
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn valid_count(&self) -> usize {
        self.lock().iter().filter(|r| r.valid).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Derive the statistics block from the current snapshot plus the
    /// engine's progress counters.
    pub fn statistics(&self, checked: usize, total: usize) -> Statistics {
        let records = self.lock();
        let total_checked = records.len();
        let valid_records: Vec<&ProxyRecord> = records.iter().filter(|r| r.valid).collect();
        let valid = valid_records.len();

        let mut by_type: HashMap<ProxyType, usize> = HashMap::new();
        for record in &valid_records {
            *by_type.entry(record.kind).or_insert(0) += 1;
        }

        let average_latency_ms = if valid > 0 {
            let sum: f64 = valid_records.iter().map(|r| r.latency_ms as f64).sum();
            Some(sum / valid as f64)
        } else {
            None
        };

        Statistics {
            total_checked,
            valid,
            invalid: total_checked - valid,
            valid_percent: if total_checked > 0 {
                valid as f64 / total_checked as f64 * 100.0
            } else {
                0.0
            },
            checked,
            total,
            by_type,
            average_latency_ms,
        }
    }

    /// Export the valid records. Returns the number written.
    pub fn export_valid<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        ProxyParser::write_export(path, "valid proxies", &self.valid())
    }

    /// Export the valid records of one kind. Returns the number written.
    pub fn export_by_type<P: AsRef<Path>>(&self, path: P, kind: ProxyType) -> Result<usize> {
        let label = format!("{} proxies", kind);
        ProxyParser::write_export(path, &label, &self.by_type(kind))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProxyRecord>> {
        self.records.lock().expect("result store lock poisoned")
    }
}

/// Aggregate view over the checked records
#[derive(Debug, Clone)]
pub struct Statistics {
    pub total_checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub valid_percent: f64,
    pub checked: usize,
    pub total: usize,
    /// Valid-record count per kind; only kinds with at least one valid
    /// record appear.
    pub by_type: HashMap<ProxyType, usize>,
    /// Mean latency over the valid records; `None` when there are none.
    pub average_latency_ms: Option<f64>,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PROXY STATISTICS ===")?;
        writeln!(f, "Total checked: {}", self.total_checked)?;
        writeln!(f, "Valid: {} ({:.1}%)", self.valid, self.valid_percent)?;
        writeln!(f, "Invalid: {}", self.invalid)?;
        writeln!(f, "Progress: {}/{}", self.checked, self.total)?;

        if !self.by_type.is_empty() {
            writeln!(f)?;
            writeln!(f, "By type:")?;
            for kind in [
                ProxyType::Http,
                ProxyType::Https,
                ProxyType::Socks4,
                ProxyType::Socks5,
            ] {
                if let Some(count) = self.by_type.get(&kind) {
                    writeln!(f, "  {}: {}", kind, count)?;
                }
            }
        }

        if let Some(average) = self.average_latency_ms {
            writeln!(f, "Average response time: {:.0} ms", average)?;
        }

        Ok(())
    }
}
