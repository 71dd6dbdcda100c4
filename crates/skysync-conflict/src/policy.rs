//! Policy engine for automatic conflict resolution
//!
//! Evaluates conflict rules from configuration to determine automatic resolution
//! strategies. Rules are matched using glob patterns in first-match-wins order,
//! against the path without its leading slash (`Documents/report.docx`).

use glob::Pattern;
use tracing::{debug, trace};

use skysync_core::config::{ConflictRuleConfig, ConflictsConfig};
use skysync_core::domain::{newtypes::RelativePath, ConflictStrategy};

use crate::error::ConflictError;

/// Checks a rule's glob pattern and strategy
pub fn validate_rule(rule: &ConflictRuleConfig) -> Result<(), ConflictError> {
    Pattern::new(&rule.pattern).map_err(|e| ConflictError::InvalidRule {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })?;

    rule.strategy
        .parse::<ConflictStrategy>()
        .map_err(|_| ConflictError::InvalidRule {
            pattern: rule.pattern.clone(),
            reason: format!(
                "invalid strategy '{}'; valid: none, keep_local, keep_remote, keep_both",
                rule.strategy
            ),
        })?;

    Ok(())
}

/// Engine that evaluates conflict resolution rules
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<(Pattern, ConflictStrategy)>,
    default_strategy: ConflictStrategy,
}

impl PolicyEngine {
    /// Creates a PolicyEngine from a default strategy and a list of rules
    ///
    /// Invalid rules are logged and skipped.
    pub fn new(default_strategy: ConflictStrategy, rules: &[ConflictRuleConfig]) -> Self {
        let compiled_rules: Vec<(Pattern, ConflictStrategy)> = rules
            .iter()
            .filter_map(|rule| {
                let pattern = match Pattern::new(&rule.pattern) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(
                            pattern = %rule.pattern,
                            error = %e,
                            "Skipping invalid conflict rule pattern"
                        );
                        return None;
                    }
                };
                let strategy = match rule.strategy.parse::<ConflictStrategy>() {
                    Ok(s) => s,
                    Err(_) => {
                        tracing::warn!(
                            strategy = %rule.strategy,
                            "Skipping invalid conflict rule strategy"
                        );
                        return None;
                    }
                };
                Some((pattern, strategy))
            })
            .collect();

        debug!(
            rules_count = compiled_rules.len(),
            default = %default_strategy,
            "PolicyEngine initialized"
        );

        Self {
            rules: compiled_rules,
            default_strategy,
        }
    }

    /// Builds the engine from the `conflicts` config section
    pub fn from_config(config: &ConflictsConfig) -> Self {
        let default = config
            .default_strategy
            .parse()
            .unwrap_or(ConflictStrategy::None);
        Self::new(default, &config.rules)
    }

    /// A policy that never auto-resolves
    pub fn manual() -> Self {
        Self::new(ConflictStrategy::None, &[])
    }

    /// Evaluates the policy for a given path
    ///
    /// The first rule whose glob matches the path determines the strategy.
    /// If no rule matches, returns the default strategy.
    pub fn evaluate(&self, path: &RelativePath) -> ConflictStrategy {
        let relative = path.as_str().trim_start_matches('/');
        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative) {
                trace!(
                    path = %path,
                    pattern = %pattern,
                    strategy = %strategy,
                    "Conflict rule matched"
                );
                return *strategy;
            }
        }

        trace!(
            path = %path,
            default = %self.default_strategy,
            "No conflict rule matched, using default"
        );
        self.default_strategy
    }

    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::manual()
    }
}
