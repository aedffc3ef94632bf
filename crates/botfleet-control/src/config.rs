//! Configuration for botfleet-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::cloud::CloudConfig;
use crate::error::{ControlError, ControlResult};
use crate::lifecycle::FunctionConfig;
use crate::naming::NamingConfig;
use crate::package::PackageConfig;
use crate::retry::{PollingConfig, RetryConfig};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Control-plane location and routing settings.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Settings applied to every bot function.
    #[serde(default)]
    pub function: FunctionConfig,

    /// Archive assembly settings.
    #[serde(default)]
    pub package: PackageConfig,

    /// Waiting on transitional function states.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Retrying the function update path.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Resource naming behaviour.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Background worker pool.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "BOTFLEET_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "botfleet.toml";

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. The file named by `BOTFLEET_CONFIG`, or `botfleet.toml` in the
    ///    current directory (if present)
    /// 3. Environment variables with `BOTFLEET_` prefix
    pub fn load() -> ControlResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| DEFAULT_CONFIG_PATH.into(), std::path::PathBuf::from);
        Self::from_file(path)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(path.as_ref())))
    }

    fn from_figment(figment: Figment) -> ControlResult<Self> {
        figment
            .merge(Env::prefixed("BOTFLEET_").ignore(&["config"]).split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Background worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Maximum queued tasks before submissions are rejected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Seconds a finished task's status stays pollable.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
}

impl WorkerConfig {
    /// How long finished task statuses are kept.
    #[must_use]
    pub const fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}

const fn default_worker_count() -> usize {
    4
}

const fn default_max_queue_size() -> usize {
    100
}

const fn default_task_retention_secs() -> u64 {
    3600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            max_queue_size: default_max_queue_size(),
            task_retention_secs: default_task_retention_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cloud::CloudProvider;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen.port(), 8090);
        assert_eq!(config.cloud.provider, CloudProvider::Aws);
        assert_eq!(config.cloud.proxy_path, "/user/{proxy+}");
        assert_eq!(config.cloud.route_method, "ANY");
        assert_eq!(config.function.runtime, "python3.10");
        assert_eq!(config.function.timeout_secs, 30);
        assert_eq!(config.package.config_entry, "app/config/config.yaml");
        assert_eq!(config.package.entry_point, "lambda_function.py");
        assert_eq!(config.polling.max_attempts, 12);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.naming.unsanitized_statement_id);
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.task_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9000"

            [cloud]
            provider = "memory"
            region = "eu-west-1"
            api_gateway_id = "abc123"

            [function]
            timeout_secs = 60
            runtime_secret = "sk-test"

            [function.environment]
            LOG_LEVEL = "debug"

            [polling]
            max_attempts = 6
            interval_secs = 5

            [naming]
            unsanitized_statement_id = false
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.cloud.provider, CloudProvider::Memory);
        assert_eq!(config.cloud.region, "eu-west-1");
        assert_eq!(config.cloud.stage, "prod");
        assert_eq!(config.function.timeout_secs, 60);
        assert_eq!(
            config
                .function
                .runtime_secret
                .as_ref()
                .map(|s| s.expose_secret().to_owned()),
            Some("sk-test".to_owned())
        );
        assert_eq!(config.function.environment["LOG_LEVEL"], "debug");
        assert_eq!(config.polling.policy().worst_case_wait(), Duration::from_secs(30));
        assert!(!config.naming.unsanitized_statement_id);
    }

    #[test]
    fn empty_secret_is_treated_as_absent() {
        let config: ControlConfig = toml::from_str("[function]\nruntime_secret = \"\"\n").unwrap();
        assert!(config.function.runtime_secret.is_none());
    }

    #[test]
    fn config_from_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            "[worker]\ncount = 2\ntask_retention_secs = 120\n\n[cloud]\nprovider = \"memory\"\n",
        )
        .unwrap();

        let config = ControlConfig::from_file(&path).unwrap();
        assert_eq!(config.worker.count, 2);
        assert_eq!(config.worker.task_retention(), Duration::from_secs(120));
        assert_eq!(config.worker.max_queue_size, 100);
        assert_eq!(config.cloud.provider, CloudProvider::Memory);
        assert_eq!(config.server.listen.port(), 8090);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, "[worker\ncount = 2\n").unwrap();

        let err = ControlConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }
}
