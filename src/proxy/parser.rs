//! Proxy parser module for reading proxy lists and writing export files

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::Result;
use anyhow::Context;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::warn;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:\s]+):(\d{1,5})(?::([A-Za-z0-9]+))?$").expect("Invalid proxy line regex")
});

/// Proxy parser for reading list files and writing export files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single `host:port` or `host:port:kind` line.
    ///
    /// Blank lines and `#`/`//` comments yield `None`, as does anything
    /// that does not match the line format. An unknown kind token falls
    /// back to HTTP.
    pub fn parse_line(line: &str) -> Option<ProxyRecord> {
        let line = line.trim();
        if Self::is_ignored(line) {
            return None;
        }

        let caps = LINE_RE.captures(line)?;
        let host = caps[1].to_string();
        let port: u16 = caps[2].parse().ok().filter(|port| *port > 0)?;
        let kind = caps
            .get(3)
            .map(|m| ProxyType::from_name(m.as_str()))
            .unwrap_or_default();

        Some(ProxyRecord::new(host, port, kind))
    }

    /// Parse a batch of lines. Comments and blanks are skipped silently;
    /// a malformed line is skipped with a warning, never an error.
    pub fn parse_lines<I, S>(lines: I) -> Vec<ProxyRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = Vec::new();
        for (number, raw) in lines.into_iter().enumerate() {
            let line = raw.as_ref().trim();
            if Self::is_ignored(line) {
                continue;
            }
            match Self::parse_line(line) {
                Some(record) => records.push(record),
                None => warn!("Skipping malformed proxy on line {}: {}", number + 1, line),
            }
        }
        records
    }

    /// Parse proxies from a string (multiple lines)
    pub fn parse_string(content: &str) -> Vec<ProxyRecord> {
        Self::parse_lines(content.lines())
    }

    /// Parse proxies from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<ProxyRecord>> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("cannot read proxy list {}", path.as_ref().display()))?;
        Ok(Self::parse_string(&content))
    }

    /// Write records in the export format: a two-line comment header, a
    /// blank separator, then one `host:port:kind` line per record.
    /// Returns the number of records written.
    pub fn write_export<P: AsRef<Path>>(
        path: P,
        label: &str,
        records: &[ProxyRecord],
    ) -> Result<usize> {
        let mut out = String::new();
        out.push_str(&format!(
            "# {} exported on {}\n",
            label,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("# Total {}: {}\n\n", label, records.len()));

        for record in records {
            out.push_str(&record.to_file_format());
            out.push('\n');
        }

        fs::write(&path, out)
            .with_context(|| format!("cannot write export file {}", path.as_ref().display()))?;
        Ok(records.len())
    }

    fn is_ignored(line: &str) -> bool {
        line.is_empty() || line.starts_with('#') || line.starts_with("//")
    }
}
