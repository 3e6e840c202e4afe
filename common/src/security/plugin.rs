// Auth plugin loaders
//
// Two ways to obtain an `Auth` instance by (location, exported name):
// a registry of capabilities compiled into the binary, and an out-of-process
// executable speaking a small JSON protocol:
//
//   <binary> describe         -> {"exports": {"<name>": "<kind>", ...}}
//   <binary> invoke <name>    <- one JSON request on stdin
//                             -> {"result": ...} or {"error": "..."} on stdout

use super::jwt::JwtAuth;
use super::Auth;
use crate::errors::{AuthError, PluginError};
use crate::models::UserIdentity;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Location naming the built-in registry
pub const BUILTIN_PLUGIN: &str = "builtin";

/// Capability kind an auth export must declare
pub const AUTH_KIND: &str = "auth";

/// Resolves an exported capability into an `Auth` instance
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, location: &str, exported: &str) -> Result<Arc<dyn Auth>, PluginError>;
}

// ============================================================================
// Built-in registry
// ============================================================================

#[derive(Default)]
pub struct BuiltinPluginLoader {
    registry: HashMap<String, Arc<dyn Auth>>,
}

impl BuiltinPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the JWT capability exported as "Auth"
    pub fn with_jwt(secret: &str) -> Self {
        let mut loader = Self::new();
        loader.register("Auth", Arc::new(JwtAuth::new(secret)));
        loader
    }

    pub fn register(&mut self, exported: impl Into<String>, instance: Arc<dyn Auth>) {
        self.registry.insert(exported.into(), instance);
    }
}

#[async_trait]
impl PluginLoader for BuiltinPluginLoader {
    async fn load(&self, location: &str, exported: &str) -> Result<Arc<dyn Auth>, PluginError> {
        if location != BUILTIN_PLUGIN {
            return Err(PluginError::Load {
                location: location.to_string(),
            });
        }

        self.registry
            .get(exported)
            .cloned()
            .ok_or_else(|| PluginError::Lookup {
                location: location.to_string(),
                exported: exported.to_string(),
            })
    }
}

// ============================================================================
// Out-of-process plugins
// ============================================================================

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    exports: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PluginResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct ProcessPluginLoader {
    timeout: Duration,
}

impl ProcessPluginLoader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PluginLoader for ProcessPluginLoader {
    #[instrument(skip(self))]
    async fn load(&self, location: &str, exported: &str) -> Result<Arc<dyn Auth>, PluginError> {
        let load_error = || PluginError::Load {
            location: location.to_string(),
        };

        let mut command = Command::new(location);
        command
            .arg("describe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| load_error())?
            .map_err(|_| load_error())?;
        if !output.status.success() {
            return Err(load_error());
        }

        let manifest: Manifest = serde_json::from_slice(&output.stdout)
            .map_err(|e| PluginError::Protocol(format!("invalid describe output: {}", e)))?;

        match manifest.exports.get(exported) {
            None => Err(PluginError::Lookup {
                location: location.to_string(),
                exported: exported.to_string(),
            }),
            Some(kind) if kind != AUTH_KIND => Err(PluginError::TypeMismatch {
                exported: exported.to_string(),
                expected: AUTH_KIND.to_string(),
                found: kind.clone(),
            }),
            Some(_) => {
                debug!("Plugin export resolved");
                Ok(Arc::new(ProcessAuth {
                    location: location.to_string(),
                    exported: exported.to_string(),
                    timeout: self.timeout,
                }))
            }
        }
    }
}

/// `Auth` backed by one plugin process per call
struct ProcessAuth {
    location: String,
    exported: String,
    timeout: Duration,
}

impl ProcessAuth {
    async fn invoke<T: DeserializeOwned>(&self, request: Value) -> Result<T, AuthError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| PluginError::Protocol(format!("failed to encode request: {}", e)))?;

        let mut child = Command::new(&self.location)
            .arg("invoke")
            .arg(&self.exported)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|_| PluginError::Load {
                location: self.location.clone(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| PluginError::Protocol(format!("failed to write request: {}", e)))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| PluginError::Protocol(format!("failed to write request: {}", e)))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PluginError::Protocol("plugin call timed out".to_string()))?
            .map_err(|e| PluginError::Protocol(format!("plugin call failed: {}", e)))?;

        let response: PluginResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| PluginError::Protocol(format!("invalid plugin response: {}", e)))?;

        if let Some(message) = response.error {
            return Err(AuthError::InvalidToken(message));
        }
        let result = response
            .result
            .ok_or_else(|| PluginError::Protocol("plugin response has no result".to_string()))?;

        serde_json::from_value(result)
            .map_err(|e| PluginError::Protocol(format!("unexpected plugin result: {}", e)).into())
    }
}

#[async_trait]
impl Auth for ProcessAuth {
    #[instrument(skip(self, token))]
    async fn authenticate(&self, email: &str, token: &str) -> Result<UserIdentity, AuthError> {
        self.invoke(json!({
            "method": "authenticate",
            "email": email,
            "token": token,
        }))
        .await
    }

    #[instrument(skip(self, user), fields(email = %user.email))]
    async fn verify(&self, user: &UserIdentity, groups: &[String]) -> Result<bool, AuthError> {
        self.invoke(json!({
            "method": "verify",
            "user": user,
            "groups": groups,
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_lookup() {
        let loader = BuiltinPluginLoader::with_jwt("secret");
        assert!(loader.load(BUILTIN_PLUGIN, "Auth").await.is_ok());

        let err = loader.load(BUILTIN_PLUGIN, "Missing").await.err().unwrap();
        assert_eq!(
            err,
            PluginError::Lookup {
                location: BUILTIN_PLUGIN.to_string(),
                exported: "Missing".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_load_error() {
        let loader = ProcessPluginLoader::new(Duration::from_secs(5));
        let err = loader
            .load("non-existing-binary", "Auth")
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "failed to load plugin binary from location: non-existing-binary"
        );
    }
}
