//! Daemon configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::reconciler::ReconcilePolicy;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pacelink.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV_VAR: &str = "PACELINK_SOCKET";

/// Runtime configuration for the daemon.
///
/// Built from defaults, then environment, then command-line flags; the
/// entry point does the layering so the rest of the daemon sees one
/// immutable value.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Path where the Unix socket will be created.
    pub socket_path: PathBuf,

    /// Minimum spacing between full telemetry pushes to the companion.
    /// Heart-rate partials bypass this bound.
    pub tick_interval: Duration,

    /// Minimum spacing between glanceable-surface pushes.
    pub surface_min_interval: Duration,

    /// Retry policy for post-workout reconciliation.
    pub reconcile: ReconcilePolicy,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            tick_interval: Duration::from_secs(1),
            surface_min_interval: Duration::from_secs(2),
            reconcile: ReconcilePolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Builds the configuration from defaults plus the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var(SOCKET_ENV_VAR) {
            if !path.is_empty() {
                config.socket_path = PathBuf::from(path);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert!(config.surface_min_interval > Duration::ZERO);
    }
}
