//! Core policy types: the evaluation input, the rule shape, and the
//! resulting decision.

use serde::{Deserialize, Serialize};

/// An immutable decision input evaluated against the rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Database name, if known.
    pub database: Option<String>,
    /// Authenticated user, if known (not populated on the core data path).
    pub user: Option<String>,
    /// Full SQL text, for pattern/table-level decisions.
    pub sql_text: Option<String>,
    /// Qualified table name.
    pub table: Option<String>,
    /// Column or parameter name (`schema.table.column`, `@param`, or bare).
    pub column: Option<String>,
    /// The literal value under evaluation.
    pub value: Option<String>,
}

/// What a rule's selector is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTarget {
    /// Match `selector` against `Event::table`, case-insensitively.
    Table,
    /// Match `selector` against `Event::column`.
    Column,
    /// Match `selector` as a case-insensitive substring of `Event::sql_text`.
    Pattern,
}

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Forward unchanged.
    Allow,
    /// Drop the message (in enforce mode).
    Block,
    /// Replace the value with its normalized form (in enforce mode).
    Autocorrect,
}

impl RuleAction {
    /// The counter label used for `rule:<id>:<action>` keys.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Block => "block",
            RuleAction::Autocorrect => "autocorrect",
        }
    }
}

/// A single ordered policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique, non-empty identifier.
    pub id: String,
    /// What `selector` is matched against.
    pub target: RuleTarget,
    /// The match value; semantics depend on `target`.
    pub selector: String,
    /// What to do when this rule matches.
    pub action: RuleAction,
    /// Human-readable justification, surfaced in decision records.
    #[serde(default)]
    pub reason: String,
    /// Confidence score in `[0, 1]`, surfaced in decision records.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Whether this rule is considered during matching.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// If set, the rule only applies when the proxy's configured
    /// environment (case-insensitive) is in this set.
    #[serde(default)]
    pub apply_in_envs: Option<Vec<String>>,
    /// Require this many prior block/autocorrect hits for this rule before
    /// enforcement actually engages (§4.5 threshold gating). `0` disables
    /// gating.
    #[serde(default)]
    pub min_hits_to_enforce: u64,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// The outcome of evaluating an `Event` against the rule list.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// The action to take.
    pub action: RuleAction,
    /// Why this action was chosen.
    pub reason: String,
    /// Confidence score carried from the matching rule (or `1.0` default-allow).
    pub confidence: f64,
    /// A replacement value, filled in by the caller after normalization.
    pub corrected_value: Option<String>,
    /// The id of the rule that matched, if any.
    pub rule_id: Option<String>,
}

impl PolicyDecision {
    /// The default decision when no rule matches.
    #[must_use]
    pub fn default_allow() -> Self {
        Self {
            action: RuleAction::Allow,
            reason: "no matching rule".to_string(),
            confidence: 1.0,
            corrected_value: None,
            rule_id: None,
        }
    }
}
