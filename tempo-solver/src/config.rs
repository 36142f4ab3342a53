//! Declarative solver configuration.
//!
//! Enumerates the flaw managers in consultation order, with their matching
//! rules. Loadable from TOML; validated once at load time.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::flaws::{FlawKind, FlawManager};
use crate::matching::{Guard, MatchingRule, WEIGHT_BASE};

/// Fallback priority for rules (and rule-less flaws) lacking one.
pub const DEFAULT_PRIORITY: i64 = 99_999;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SolverConfig {
    /// Fallback priority for rules lacking one.
    pub default_priority: Option<i64>,
    /// Managers in consultation order. Empty means the standard three.
    pub flaw_managers: Vec<ManagerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub kind: ManagerKind,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    UnboundVariable,
    OpenCondition,
    Threat,
}

impl ManagerKind {
    fn flaw_kind(self) -> FlawKind {
        match self {
            ManagerKind::UnboundVariable => FlawKind::UnboundVariable,
            ManagerKind::OpenCondition => FlawKind::OpenCondition,
            ManagerKind::Threat => FlawKind::Threat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuleConfig {
    pub class: Option<String>,
    pub predicate: Option<String>,
    pub variable: Option<String>,
    pub master_class: Option<String>,
    pub master_predicate: Option<String>,
    pub master_relation: Option<String>,
    pub guards: Vec<GuardConfig>,
    pub master_guards: Vec<GuardConfig>,
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    pub name: String,
    pub value: i64,
}

impl SolverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SolverConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn effective_default_priority(&self) -> i64 {
        self.default_priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |priority: i64, rule: &RuleConfig| -> Result<(), ConfigError> {
            if !(0..WEIGHT_BASE).contains(&priority) {
                return Err(ConfigError::PriorityOutOfRange {
                    priority,
                    limit: WEIGHT_BASE,
                    rule: format!("{rule:?}"),
                });
            }
            Ok(())
        };
        for manager in &self.flaw_managers {
            for rule in &manager.rules {
                check(rule.priority.unwrap_or(self.effective_default_priority()), rule)?;
                for guard in rule.guards.iter().chain(rule.master_guards.iter()) {
                    if guard.name.is_empty() {
                        return Err(ConfigError::EmptyGuard {
                            name: guard.name.clone(),
                        });
                    }
                }
            }
        }
        if !(0..WEIGHT_BASE).contains(&self.effective_default_priority()) {
            return Err(ConfigError::PriorityOutOfRange {
                priority: self.effective_default_priority(),
                limit: WEIGHT_BASE,
                rule: "default_priority".to_string(),
            });
        }
        Ok(())
    }

    /// Instantiate the managers in consultation order.
    pub fn build_managers(&self) -> Result<Vec<FlawManager>, ConfigError> {
        self.validate()?;
        let default_priority = self.effective_default_priority();
        if self.flaw_managers.is_empty() {
            return Ok(vec![
                FlawManager::new(FlawKind::UnboundVariable, default_priority),
                FlawManager::new(FlawKind::OpenCondition, default_priority),
                FlawManager::new(FlawKind::Threat, default_priority),
            ]);
        }
        let mut managers = Vec::with_capacity(self.flaw_managers.len());
        for mc in &self.flaw_managers {
            let mut manager = FlawManager::new(mc.kind.flaw_kind(), default_priority);
            for rc in &mc.rules {
                manager.add_rule(MatchingRule {
                    class: rc.class.clone(),
                    predicate: rc.predicate.clone(),
                    variable: rc.variable.clone(),
                    master_class: rc.master_class.clone(),
                    master_predicate: rc.master_predicate.clone(),
                    master_relation: rc.master_relation.clone(),
                    guards: rc
                        .guards
                        .iter()
                        .map(|g| Guard {
                            variable: g.name.clone(),
                            value: g.value,
                        })
                        .collect(),
                    master_guards: rc
                        .master_guards
                        .iter()
                        .map(|g| Guard {
                            variable: g.name.clone(),
                            value: g.value,
                        })
                        .collect(),
                    priority: rc.priority.unwrap_or(default_priority),
                });
            }
            managers.push(manager);
        }
        Ok(managers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_managers_and_rules_from_toml() {
        let config = SolverConfig::from_toml_str(
            r#"
            default_priority = 500

            [[flaw_managers]]
            kind = "threat"

            [[flaw_managers.rules]]
            class = "Rover"
            predicate = "At"
            priority = 5

            [[flaw_managers.rules.guards]]
            name = "x"
            value = 2

            [[flaw_managers]]
            kind = "open-condition"
            "#,
        )
        .unwrap();
        assert_eq!(config.effective_default_priority(), 500);
        assert_eq!(config.flaw_managers.len(), 2);
        assert_eq!(config.flaw_managers[0].kind, ManagerKind::Threat);
        let rule = &config.flaw_managers[0].rules[0];
        assert_eq!(rule.priority, Some(5));
        assert_eq!(rule.guards[0].name, "x");

        let managers = config.build_managers().unwrap();
        assert_eq!(managers.len(), 2);
        assert_eq!(managers[0].rules().len(), 1);
        assert_eq!(managers[0].rules()[0].weight(), (5 - 5 * WEIGHT_BASE).abs());
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let err = SolverConfig::from_toml_str(
            r#"
            [[flaw_managers]]
            kind = "threat"

            [[flaw_managers.rules]]
            priority = 100000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PriorityOutOfRange { .. }));
    }

    #[test]
    fn empty_config_yields_standard_managers() {
        let managers = SolverConfig::default().build_managers().unwrap();
        assert_eq!(managers.len(), 3);
    }
}
