//! Engine configuration

use serde::{Deserialize, Serialize};

/// Default number of concurrent installer calls
pub const DEFAULT_PARALLELISM: usize = 5;

/// Upper bound for the parallelism setting
pub const MAX_PARALLELISM: usize = 16;

/// Update policy applied before the DAG phase
///
/// Each flag independently taints eligible state entries, forcing their
/// reinstallation this apply. Exact-version resources are never eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Taint every `latest` tool (alias tools stay pinned to their channel)
    pub sync_mode: bool,
    /// Taint every `latest` and alias tool
    pub update_tools: bool,
    /// Taint every `latest` and alias runtime
    pub update_runtimes: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub parallelism: usize,
    pub update: UpdateConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            update: UpdateConfig::default(),
        }
    }
}

/// Clamp a requested parallelism into `1..=MAX_PARALLELISM`
pub(crate) fn clamp_parallelism(requested: usize) -> usize {
    requested.clamp(1, MAX_PARALLELISM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_parallelism(0), 1);
        assert_eq!(clamp_parallelism(1), 1);
        assert_eq!(clamp_parallelism(5), 5);
        assert_eq!(clamp_parallelism(MAX_PARALLELISM), MAX_PARALLELISM);
        assert_eq!(clamp_parallelism(MAX_PARALLELISM + 50), MAX_PARALLELISM);
    }

    #[test]
    fn test_update_config_defaults_off() {
        let config = UpdateConfig::default();
        assert!(!config.sync_mode);
        assert!(!config.update_tools);
        assert!(!config.update_runtimes);
    }
}
