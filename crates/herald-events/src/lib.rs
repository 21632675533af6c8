//! Lifecycle event log for herald releases.
//!
//! Every provider invocation produces a BEFORE record followed by exactly one
//! SUCCESS or FAILURE record. This crate stores those records as append-only
//! JSONL so a release can be audited after the fact.
//!
//! ```
//! use herald_events::{EventLog, LifecycleRecord};
//! use herald_types::{Category, StepPhase};
//!
//! let mut log = EventLog::new();
//! log.record(LifecycleRecord::now(StepPhase::Before, Category::Announce, "slack", None));
//! assert_eq!(log.len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use herald_types::{Category, StepPhase};
use serde::{Deserialize, Serialize};

/// Default events file name
pub const EVENTS_FILE: &str = "events.jsonl";

/// Events file path inside an output directory
pub fn events_path(output_dir: &Path) -> PathBuf {
    output_dir.join(EVENTS_FILE)
}

/// One persisted lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: StepPhase,
    pub category: Category,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl LifecycleRecord {
    pub fn now(
        phase: StepPhase,
        category: Category,
        step: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            category,
            step: step.into(),
            cause,
        }
    }
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<LifecycleRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: LifecycleRecord) {
        self.events.push(event);
    }

    /// Append all recorded events to `path`, creating parent directories.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }

        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Read every event from a JSONL file; a missing file is an empty log.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line
                .with_context(|| format!("failed to read events file {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: LifecycleRecord = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    /// Events for one provider within a category.
    pub fn events_for_step(&self, category: Category, step: &str) -> Vec<&LifecycleRecord> {
        self.events
            .iter()
            .filter(|e| e.category == category && e.step == step)
            .collect()
    }

    pub fn all_events(&self) -> &[LifecycleRecord] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn before(step: &str) -> LifecycleRecord {
        LifecycleRecord::now(StepPhase::Before, Category::Upload, step, None)
    }

    #[test]
    fn new_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn events_for_step_filters_by_category_and_name() {
        let mut log = EventLog::new();
        log.record(before("files"));
        log.record(LifecycleRecord::now(StepPhase::Before, Category::Deploy, "files", None));
        log.record(LifecycleRecord::now(
            StepPhase::Failure,
            Category::Upload,
            "files",
            Some("HTTP 503".to_string()),
        ));

        let upload = log.events_for_step(Category::Upload, "files");
        assert_eq!(upload.len(), 2);
        assert_eq!(upload[1].cause.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn write_appends_across_calls() {
        let td = tempdir().expect("tempdir");
        let path = events_path(&td.path().join("out"));

        let mut log = EventLog::new();
        log.record(before("a"));
        log.write_to_file(&path).expect("write");
        log.clear();
        log.record(before("b"));
        log.write_to_file(&path).expect("write");

        let content = fs::read_to_string(&path).expect("read");
        assert_eq!(content.lines().count(), 2);

        let loaded = EventLog::read_from_file(&path).expect("read");
        let steps: Vec<&str> = loaded.all_events().iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, ["a", "b"]);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let td = tempdir().expect("tempdir");
        let log = EventLog::read_from_file(&td.path().join("absent.jsonl")).expect("read");
        assert!(log.is_empty());
    }

    #[test]
    fn corrupt_line_is_an_error() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(EVENTS_FILE);
        fs::write(&path, "{not json}\n").expect("write");
        let err = EventLog::read_from_file(&path).expect_err("must fail");
        assert!(format!("{err:#}").contains("failed to parse event JSON"));
    }

    #[test]
    fn cause_is_omitted_when_absent() {
        let json = serde_json::to_string(&before("x")).expect("serialize");
        assert!(!json.contains("cause"));
        assert!(json.contains("\"phase\":\"before\""));
        assert!(json.contains("\"category\":\"upload\""));
    }
}
