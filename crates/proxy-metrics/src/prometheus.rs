//! Prometheus-style text exposition for the counter store.
//!
//! One counter vector keyed by `(key, rule, action)`, plus fixed histogram
//! bucket boundaries for forwarded byte sizes and per-iteration processing
//! latency.

use crate::counters::CounterStore;

/// Byte-size histogram buckets (upper bounds, in bytes).
pub const BYTES_BUCKETS: &[u64] = &[64, 256, 1024, 4096, 16384, 65536, 262144, 1_048_576];

/// Per-iteration processing latency histogram buckets (upper bounds, in ms).
pub const LATENCY_MS_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0];

/// Render every counter as a Prometheus text-exposition line.
///
/// Flat keys (no `rule:` prefix) are exposed with empty `rule`/`action`
/// labels; `rule:<id>:<action>` keys are split into their labeled form.
#[must_use]
pub fn render_text(store: &CounterStore) -> String {
    let mut lines = String::new();
    for (key, value) in store.get_all() {
        let (metric_key, rule, action) = split_key(&key);
        lines.push_str(&format!(
            "tds_proxy_metric{{key=\"{metric_key}\",rule=\"{rule}\",action=\"{action}\"}} {value}\n"
        ));
    }
    lines
}

fn split_key(key: &str) -> (String, String, String) {
    if let Some(rest) = key.strip_prefix("rule:") {
        if let Some((rule, action)) = rest.split_once(':') {
            return ("rule".to_string(), rule.to_string(), action.to_string());
        }
    }
    (key.to_string(), String::new(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_key_has_empty_labels() {
        let store = CounterStore::new(std::env::temp_dir().join(format!(
            "proxy-metrics-prom-test-{}.json",
            std::process::id()
        )));
        store.inc("blocks", 2);
        let text = render_text(&store);
        assert!(text.contains(r#"key="blocks",rule="",action="""#));
    }

    #[test]
    fn rule_key_splits_into_labels() {
        let path = std::env::temp_dir().join(format!(
            "proxy-metrics-prom-test2-{}.json",
            std::process::id()
        ));
        let store = CounterStore::new(&path);
        store.inc_rule_action("r1", "block", 1);
        let text = render_text(&store);
        assert!(text.contains(r#"key="rule",rule="r1",action="block""#));
        let _ = std::fs::remove_file(&path);
    }
}
