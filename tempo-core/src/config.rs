//! Engine-level configuration.

use serde::{Deserialize, Serialize};

/// Tunables shared by the engine and the plan database.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Mutating operations drive propagation themselves. Default: true.
    /// The solver turns this off and drives the gate explicitly.
    pub auto_propagate: Option<bool>,
    /// Cap on ordering choices enumerated per query when the caller does not
    /// pass one. Default: unlimited.
    pub default_ordering_limit: Option<usize>,
}

impl EngineConfig {
    pub fn effective_auto_propagate(&self) -> bool {
        self.auto_propagate.unwrap_or(true)
    }

    pub fn effective_default_ordering_limit(&self) -> usize {
        self.default_ordering_limit.unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::default();
        assert!(config.effective_auto_propagate());
        assert_eq!(config.effective_default_ordering_limit(), usize::MAX);
    }
}
