//! First-match-wins evaluation of an `Event` against an ordered rule list.

use crate::types::{Event, PolicyDecision, Rule, RuleTarget};

/// An ordered, immutable snapshot of the rule catalog plus the proxy's
/// configured environment tag.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<Rule>,
    environment: String,
}

impl PolicyEngine {
    /// Build an engine from an ordered rule list and an environment tag
    /// (compared case-insensitively against each rule's `apply_in_envs`).
    #[must_use]
    pub fn new(rules: Vec<Rule>, environment: impl Into<String>) -> Self {
        Self {
            rules,
            environment: environment.into().to_lowercase(),
        }
    }

    /// The rule list this engine was built with.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Look up a rule by id.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// Evaluate `event` against the rule list, returning the first match or
    /// a default-allow decision.
    #[must_use]
    pub fn decide(&self, event: &Event) -> PolicyDecision {
        for rule in &self.rules {
            if !rule.enabled {
                continue;
            }
            if let Some(envs) = &rule.apply_in_envs {
                if !self.environment.is_empty() {
                    let admitted = envs.iter().any(|e| e.to_lowercase() == self.environment);
                    if !admitted {
                        continue;
                    }
                }
            }

            if self.matches(rule, event) {
                return PolicyDecision {
                    action: rule.action,
                    reason: rule.reason.clone(),
                    confidence: rule.confidence,
                    corrected_value: None,
                    rule_id: Some(rule.id.clone()),
                };
            }
        }
        PolicyDecision::default_allow()
    }

    fn matches(&self, rule: &Rule, event: &Event) -> bool {
        match rule.target {
            RuleTarget::Table => event
                .table
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(&rule.selector)),
            RuleTarget::Column => event.column.as_deref().is_some_and(|col| {
                let sel = rule.selector.to_lowercase();
                let col = col.to_lowercase();
                if sel.contains('.') {
                    sel == col
                } else {
                    let last_seg = col.rsplit('.').next().unwrap_or(&col);
                    sel.trim_start_matches('@') == last_seg.trim_start_matches('@')
                }
            }),
            RuleTarget::Pattern => event
                .sql_text
                .as_deref()
                .is_some_and(|sql| sql.to_lowercase().contains(&rule.selector.to_lowercase())),
        }
    }
}
