//! Append-only decision log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single logged decision. Every record carries a UTC timestamp injected
/// by the sink; the remaining fields are a superset covering batch,
/// column-level autocorrect, and RPC records (unused fields are omitted
/// from the JSON line via `skip_serializing_if`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// UTC ISO 8601 timestamp, set by the sink on append.
    #[serde(default)]
    pub ts: String,
    /// The action taken: `"allow"`, `"block"`, or `"autocorrect"`.
    pub action: String,
    /// The rule that produced this decision, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Why this decision was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// A truncated sample of the statement text, for batch-level records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    /// The affected column, for autocorrect records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// The value before correction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// The value after correction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// The RPC parameter name, for RPC records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// The TDS session id of the connection this decision was made on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spid: Option<u16>,
}

impl DecisionRecord {
    /// Start building a record for `action`; all other fields are unset.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            ts: String::new(),
            action: action.into(),
            rule_id: None,
            reason: None,
            sample: None,
            column: None,
            before: None,
            after: None,
            param: None,
            spid: None,
        }
    }

    /// Attach the rule that produced this decision, if any.
    #[must_use]
    pub fn with_rule(mut self, rule_id: Option<String>, reason: impl Into<String>) -> Self {
        self.rule_id = rule_id;
        self.reason = Some(reason.into());
        self
    }

    /// Attach the affected column selector.
    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Attach the before/after values of an autocorrect.
    #[must_use]
    pub fn with_values(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self.after = Some(after.into());
        self
    }

    /// Attach an RPC parameter name.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Attach the TDS session id.
    #[must_use]
    pub fn with_spid(mut self, spid: u16) -> Self {
        self.spid = Some(spid);
        self
    }
}

/// An append-only sink for decision records.
///
/// Expressed as a trait (rather than a concrete type baked into the
/// controller) so tests can substitute a deterministic in-memory fake.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    /// Append one record, stamping it with the current UTC time.
    async fn append(&self, record: DecisionRecord);

    /// Return the most recent `limit` records.
    async fn tail(&self, limit: usize) -> Vec<DecisionRecord>;
}

/// A `DecisionSink` backed by a newline-delimited JSON file.
pub struct FileDecisionSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileDecisionSink {
    /// Open (or create, lazily on first append) a file-backed sink.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append_sync(&self, mut record: DecisionRecord) {
        record.ts = Utc::now().to_rfc3339();
        let _guard = self.lock.lock();

        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!(?err, "failed to create decisions directory");
                return;
            }
        }

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(?err, "failed to serialize decision record");
                return;
            }
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(err) = result {
            tracing::warn!(?err, "failed to append decision record");
        }
    }

    fn tail_sync(&self, limit: usize) -> Vec<DecisionRecord> {
        let _guard = self.lock.lock();
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let lines: Vec<&str> = contents.lines().collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[async_trait]
impl DecisionSink for FileDecisionSink {
    async fn append(&self, record: DecisionRecord) {
        // The write is a cheap, non-blocking-in-practice append; doing it
        // synchronously under the lock keeps ordering trivially correct
        // without pulling in a background flush task.
        self.append_sync(record);
    }

    async fn tail(&self, limit: usize) -> Vec<DecisionRecord> {
        self.tail_sync(limit)
    }
}

/// A deterministic, in-memory decision sink for tests.
#[derive(Default)]
pub struct InMemoryDecisionSink {
    records: Mutex<Vec<DecisionRecord>>,
}

impl InMemoryDecisionSink {
    /// Create an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionSink for InMemoryDecisionSink {
    async fn append(&self, mut record: DecisionRecord) {
        record.ts = Utc::now().to_rfc3339();
        self.records.lock().push(record);
    }

    async fn tail(&self, limit: usize) -> Vec<DecisionRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }
}

/// Shared handle to a decision sink, cheap to clone across connection tasks.
pub type SharedDecisionSink = Arc<dyn DecisionSink>;

/// Path helper kept alongside the sink for diagnostics/log messages.
#[must_use]
pub fn default_decisions_path() -> &'static Path {
    Path::new("data/metrics/decisions.jsonl")
}
