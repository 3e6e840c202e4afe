// Configuration management with layered configuration (file, env)

use crate::errors::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kubernetes: KubernetesConfig,
    pub job: JobConfig,
    pub logs: LogStreamConfig,
    pub scheduler: SchedulerSettings,
    pub auth: AuthConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

/// Where the cluster credentials come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Path to a kubeconfig file; empty means in-cluster service account
    #[serde(default)]
    pub config_path: String,
    /// Kubeconfig context; empty or "default" picks the current context
    #[serde(default)]
    pub context: String,
    pub namespace: String,
}

/// Values frozen into every submitted Job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub active_deadline_seconds: i64,
    pub backoff_limit: i32,
    #[serde(default, deserialize_with = "deserialize_annotations")]
    pub pod_annotations: BTreeMap<String, String>,
    pub pod_list_wait_seconds: u64,
    pub pod_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStreamConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub process_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub fetch_interval_minutes: u64,
    pub max_schedules_per_tick: usize,
    pub default_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Executable implementing the auth plugin protocol, or "builtin"
    pub plugin_binary: String,
    pub plugin_exported: String,
    pub plugin_retry_backoff_seconds: u64,
    pub plugin_timeout_seconds: u64,
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

/// Pod annotations may come from a TOML table or, when bound from the
/// environment, from a JSON object string such as `{"key.one":"true"}`.
fn deserialize_annotations<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Json(String),
        Table(BTreeMap<String, String>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Table(map) => Ok(map),
        Raw::Json(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
        Raw::Json(s) => parse_annotations(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a JSON object of string values into pod annotations
pub fn parse_annotations(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    serde_json::from_str(raw)
        .map_err(|e| ConfigError::Invalid(format!("invalid job pod annotations {}: {}", raw, e)))
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("PROCYARD")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("Server port must be greater than 0"));
        }

        if self.database.url.is_empty() {
            return Err(invalid("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("Database max_connections must be greater than 0"));
        }

        if self.kubernetes.namespace.is_empty() {
            return Err(invalid("Kubernetes namespace cannot be empty"));
        }

        if self.job.active_deadline_seconds <= 0 {
            return Err(invalid("Job active_deadline_seconds must be greater than 0"));
        }
        if self.job.backoff_limit < 0 {
            return Err(invalid("Job backoff_limit cannot be negative"));
        }
        if self.job.pod_poll_interval_ms == 0 {
            return Err(invalid("Job pod_poll_interval_ms must be greater than 0"));
        }

        if self.logs.read_buffer_size == 0 || self.logs.write_buffer_size == 0 {
            return Err(invalid("Log stream buffer sizes must be greater than 0"));
        }

        if self.scheduler.fetch_interval_minutes == 0 {
            return Err(invalid("Scheduler fetch_interval_minutes must be greater than 0"));
        }
        if self.scheduler.max_schedules_per_tick == 0 {
            return Err(invalid("Scheduler max_schedules_per_tick must be greater than 0"));
        }
        crate::schedule::parse_timezone(&self.scheduler.default_timezone)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.auth.plugin_binary.is_empty() {
            return Err(invalid("Auth plugin_binary cannot be empty"));
        }
        if self.auth.plugin_exported.is_empty() {
            return Err(invalid("Auth plugin_exported cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5001,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/procyard".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            kubernetes: KubernetesConfig {
                config_path: String::new(),
                context: "default".to_string(),
                namespace: "default".to_string(),
            },
            job: JobConfig {
                active_deadline_seconds: 3600,
                backoff_limit: 0,
                pod_annotations: BTreeMap::new(),
                pod_list_wait_seconds: 5,
                pod_poll_interval_ms: 500,
            },
            logs: LogStreamConfig {
                read_buffer_size: 140,
                write_buffer_size: 4096,
                process_wait_seconds: 60,
            },
            scheduler: SchedulerSettings {
                fetch_interval_minutes: 1,
                max_schedules_per_tick: 100,
                default_timezone: "UTC".to_string(),
            },
            auth: AuthConfig {
                plugin_binary: "builtin".to_string(),
                plugin_exported: "Auth".to_string(),
                plugin_retry_backoff_seconds: 30,
                plugin_timeout_seconds: 10,
                jwt_secret: "change-me-in-production".to_string(),
            },
            notification: NotificationConfig::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}
