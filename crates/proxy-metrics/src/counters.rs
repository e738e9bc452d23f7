//! A process-wide, file-backed counter store.
//!
//! Every increment is serialized through a single [`parking_lot::Mutex`]
//! around the in-memory map; the file on disk is rewritten on every
//! increment so other processes (dashboards, scrape jobs) observe a
//! consistent snapshot. This trades some write amplification for a trivial
//! read-modify-write-under-lock consistency model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::prometheus::{BYTES_BUCKETS, LATENCY_MS_BUCKETS};

/// Flat counter keys used throughout the data path, collected here so call
/// sites don't respell them.
pub mod keys {
    /// Total messages forwarded unchanged after an `allow` decision.
    pub const ALLOWED: &str = "allowed";
    /// Total messages dropped by a `block` decision.
    pub const BLOCKS: &str = "blocks";
    /// Total autocorrect suggestions computed (whether or not applied).
    pub const AUTOCORRECT_SUGGESTED: &str = "autocorrect_suggested";
    /// Total RPC messages observed.
    pub const RPC_SEEN: &str = "rpc_seen";
    /// Total RPC messages dropped by a `block` decision.
    pub const RPC_BLOCKED: &str = "rpc_blocked";
    /// Total RPC parameters rewritten in place.
    pub const RPC_AUTOCORRECT_INPLACE: &str = "rpc_autocorrect_inplace";
    /// Rewrites discarded because the produced output exceeded the size budget.
    pub const REWRITE_SKIPPED_SIZE: &str = "rewrite_skipped_size";
    /// Iterations that exceeded the time budget (never fatal).
    pub const REWRITE_SKIPPED_BUDGET: &str = "rewrite_skipped_budget";
    /// Decisions whose nominal action was demoted by threshold gating.
    pub const GATED_BY_THRESHOLD: &str = "gated_by_threshold";
}

/// A process-wide counter map, persisted as JSON.
pub struct CounterStore {
    path: PathBuf,
    data: Mutex<HashMap<String, u64>>,
}

impl CounterStore {
    /// Open (or create) a counter store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = Self::read_from_disk(&path);
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    fn read_from_disk(path: &Path) -> HashMap<String, u64> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn persist(&self, data: &HashMap<String, u64>) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!(?err, "failed to create metrics directory");
                return;
            }
        }
        match serde_json::to_string_pretty(data) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    tracing::warn!(?err, "failed to persist counters");
                }
            }
            Err(err) => tracing::warn!(?err, "failed to serialize counters"),
        }
    }

    /// Increment `key` by `by`.
    pub fn inc(&self, key: &str, by: u64) {
        let mut data = self.data.lock();
        *data.entry(key.to_string()).or_insert(0) += by;
        self.persist(&data);
    }

    /// Increment the `rule:<id>:<action>` counter for a rule hit.
    pub fn inc_rule_action(&self, rule_id: &str, action: &str, by: u64) {
        self.inc(&format!("rule:{rule_id}:{action}"), by);
    }

    /// Increment several counters under a single lock and a single disk
    /// write, rather than one `persist` per key.
    fn inc_batch(&self, pairs: &[(String, u64)]) {
        let mut data = self.data.lock();
        for (key, by) in pairs {
            *data.entry(key.clone()).or_insert(0) += by;
        }
        self.persist(&data);
    }

    /// Record one forwarded write's byte size into the cumulative byte
    /// histogram (`bytes_bucket_le_<bound>`, `bytes_count`, `bytes_sum`).
    pub fn observe_bytes(&self, n: u64) {
        let mut pairs: Vec<(String, u64)> = BYTES_BUCKETS
            .iter()
            .filter(|&&bound| n <= bound)
            .map(|bound| (format!("bytes_bucket_le_{bound}"), 1))
            .collect();
        pairs.push(("bytes_count".to_string(), 1));
        pairs.push(("bytes_sum".to_string(), n));
        self.inc_batch(&pairs);
    }

    /// Record one pump iteration's processing latency (in milliseconds)
    /// into the cumulative latency histogram (`latency_ms_bucket_le_<bound>`,
    /// `latency_ms_count`, `latency_ms_sum_us`).
    pub fn observe_latency_ms(&self, ms: f64) {
        let ms = ms.max(0.0);
        let mut pairs: Vec<(String, u64)> = LATENCY_MS_BUCKETS
            .iter()
            .filter(|&&bound| ms <= bound)
            .map(|bound| (format!("latency_ms_bucket_le_{bound}"), 1))
            .collect();
        pairs.push(("latency_ms_count".to_string(), 1));
        pairs.push(("latency_ms_sum_us".to_string(), (ms * 1000.0).round() as u64));
        self.inc_batch(&pairs);
    }

    /// Snapshot of every counter.
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, u64> {
        self.data.lock().clone()
    }

    /// The action-keyed counters recorded for one rule id
    /// (`"block" -> 3`, `"autocorrect" -> 1`, ...).
    #[must_use]
    pub fn get_rule_counters(&self, rule_id: &str) -> HashMap<String, u64> {
        let prefix = format!("rule:{rule_id}:");
        self.data
            .lock()
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|action| (action.to_string(), *v)))
            .collect()
    }

    /// Sum of block + autocorrect + rpc_autocorrect_inplace hits recorded
    /// for `rule_id`, used by §4.5 threshold gating.
    #[must_use]
    pub fn enforcement_hits(&self, rule_id: &str) -> u64 {
        let counters = self.get_rule_counters(rule_id);
        counters.get("block").copied().unwrap_or(0)
            + counters.get("autocorrect").copied().unwrap_or(0)
            + counters
                .get("rpc_autocorrect_inplace")
                .copied()
                .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("proxy-metrics-test-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn increments_and_reads_back() {
        let path = temp_path("inc");
        let store = CounterStore::new(&path);
        store.inc(keys::BLOCKS, 1);
        store.inc(keys::BLOCKS, 2);
        assert_eq!(store.get_all().get(keys::BLOCKS), Some(&3));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rule_action_counters_are_prefixed_and_filtered() {
        let path = temp_path("rule");
        let store = CounterStore::new(&path);
        store.inc_rule_action("r1", "block", 2);
        store.inc_rule_action("r1", "autocorrect", 1);
        store.inc_rule_action("r2", "block", 5);

        let counters = store.get_rule_counters("r1");
        assert_eq!(counters.get("block"), Some(&2));
        assert_eq!(counters.get("autocorrect"), Some(&1));
        assert_eq!(store.enforcement_hits("r1"), 3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reopening_reads_persisted_state() {
        let path = temp_path("reopen");
        {
            let store = CounterStore::new(&path);
            store.inc(keys::ALLOWED, 4);
        }
        let reopened = CounterStore::new(&path);
        assert_eq!(reopened.get_all().get(keys::ALLOWED), Some(&4));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn observe_bytes_fills_every_bucket_at_or_above_the_value() {
        let path = temp_path("bytes-hist");
        let store = CounterStore::new(&path);
        store.observe_bytes(300);
        let all = store.get_all();
        assert_eq!(all.get("bytes_bucket_le_1024"), Some(&1));
        assert_eq!(all.get("bytes_bucket_le_64"), None);
        assert_eq!(all.get("bytes_count"), Some(&1));
        assert_eq!(all.get("bytes_sum"), Some(&300));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn observe_latency_ms_fills_every_bucket_at_or_above_the_value() {
        let path = temp_path("latency-hist");
        let store = CounterStore::new(&path);
        store.observe_latency_ms(3.2);
        let all = store.get_all();
        assert_eq!(all.get("latency_ms_bucket_le_5"), Some(&1));
        assert_eq!(all.get("latency_ms_bucket_le_2"), None);
        assert_eq!(all.get("latency_ms_count"), Some(&1));
        assert_eq!(all.get("latency_ms_sum_us"), Some(&3200));
        let _ = std::fs::remove_file(&path);
    }
}
