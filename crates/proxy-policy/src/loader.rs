//! Loading the rule catalog from a JSON file.

use std::path::Path;

use crate::types::Rule;

/// Load rules from `path`.
///
/// A missing file yields an empty rule set (never an error — the proxy
/// should still start up, default-allowing everything). Malformed entries
/// are skipped individually rather than failing the whole load, so one bad
/// rule doesn't take the rest of the catalog down with it.
#[must_use]
pub fn load_rules(path: &Path) -> Vec<Rule> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        tracing::info!(path = %path.display(), "rules file not found; starting with an empty catalog");
        return Vec::new();
    };

    let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&raw) else {
        tracing::warn!(path = %path.display(), "rules file is not a JSON array; starting with an empty catalog");
        return Vec::new();
    };

    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Rule>(entry.clone()) {
            Ok(rule) => rules.push(rule),
            Err(err) => tracing::warn!(?err, entry = %entry, "skipping malformed rule entry"),
        }
    }
    rules
}
