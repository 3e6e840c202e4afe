// Security service: authentication and group authorization through a
// pluggable `Auth` capability, loaded once on first use.

pub mod jwt;
pub mod plugin;

pub use jwt::JwtAuth;
pub use plugin::{BuiltinPluginLoader, PluginLoader, ProcessPluginLoader, BUILTIN_PLUGIN};

use crate::config::AuthConfig;
use crate::errors::{AuthError, PluginError};
use crate::models::UserIdentity;
use crate::telemetry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// Authentication and authorization capability
#[async_trait]
pub trait Auth: Send + Sync {
    /// Resolve the identity behind an email/token pair
    async fn authenticate(&self, email: &str, token: &str) -> Result<UserIdentity, AuthError>;

    /// May `user` act on something owned by one of `groups`
    async fn verify(&self, user: &UserIdentity, groups: &[String]) -> Result<bool, AuthError>;
}

/// The common authorization rule: active users pass when no group is
/// required, or when they belong to at least one of the required groups.
pub fn membership_allows(user: &UserIdentity, groups: &[String]) -> bool {
    user.active && (groups.is_empty() || groups.iter().any(|g| user.groups.contains(g)))
}

/// Lifecycle of the auth plugin instance
pub enum PluginState {
    Uninitialized,
    Loaded(Arc<dyn Auth>),
    Failed { error: PluginError, at: Instant },
}

impl PluginState {
    pub fn name(&self) -> &'static str {
        match self {
            PluginState::Uninitialized => "uninitialized",
            PluginState::Loaded(_) => "loaded",
            PluginState::Failed { .. } => "failed",
        }
    }
}

/// `Auth` front that loads the configured plugin on first use.
///
/// Concurrent first callers serialize on the state lock, so exactly one load
/// attempt runs and every caller sees its outcome. A failed load is cached
/// for `retry_backoff`, then the next caller tries again.
pub struct SecurityService {
    loader: Arc<dyn PluginLoader>,
    location: String,
    exported: String,
    retry_backoff: Duration,
    state: Mutex<PluginState>,
}

impl SecurityService {
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        location: impl Into<String>,
        exported: impl Into<String>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            loader,
            location: location.into(),
            exported: exported.into(),
            retry_backoff,
            state: Mutex::new(PluginState::Uninitialized),
        }
    }

    /// Built-in registry when `plugin_binary` is "builtin", otherwise an
    /// out-of-process plugin executable
    pub fn from_config(config: &AuthConfig) -> Self {
        let loader: Arc<dyn PluginLoader> = if config.plugin_binary == BUILTIN_PLUGIN {
            Arc::new(BuiltinPluginLoader::with_jwt(&config.jwt_secret))
        } else {
            Arc::new(ProcessPluginLoader::new(Duration::from_secs(
                config.plugin_timeout_seconds,
            )))
        };

        Self::new(
            loader,
            &config.plugin_binary,
            &config.plugin_exported,
            Duration::from_secs(config.plugin_retry_backoff_seconds),
        )
    }

    /// Current plugin state name, for health reporting
    pub async fn state_name(&self) -> &'static str {
        self.state.lock().await.name()
    }

    #[instrument(skip(self), fields(location = %self.location, exported = %self.exported))]
    async fn instance(&self) -> Result<Arc<dyn Auth>, AuthError> {
        let mut state = self.state.lock().await;

        match &*state {
            PluginState::Loaded(instance) => return Ok(Arc::clone(instance)),
            PluginState::Failed { error, at } if at.elapsed() < self.retry_backoff => {
                return Err(AuthError::Plugin(error.clone()));
            }
            _ => {}
        }

        match self.loader.load(&self.location, &self.exported).await {
            Ok(instance) => {
                info!("Auth plugin loaded");
                telemetry::record_plugin_load("loaded");
                *state = PluginState::Loaded(Arc::clone(&instance));
                Ok(instance)
            }
            Err(e) => {
                error!(error = %e, "Failed to load auth plugin");
                telemetry::record_plugin_load("failed");
                *state = PluginState::Failed {
                    error: e.clone(),
                    at: Instant::now(),
                };
                Err(AuthError::Plugin(e))
            }
        }
    }
}

#[async_trait]
impl Auth for SecurityService {
    async fn authenticate(&self, email: &str, token: &str) -> Result<UserIdentity, AuthError> {
        self.instance().await?.authenticate(email, token).await
    }

    async fn verify(&self, user: &UserIdentity, groups: &[String]) -> Result<bool, AuthError> {
        self.instance().await?.verify(user, groups).await
    }
}
