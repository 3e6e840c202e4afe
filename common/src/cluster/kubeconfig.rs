// Resolution of cluster connection details from a kubeconfig file or from
// the in-cluster service account.

use crate::config::KubernetesConfig;
use crate::errors::ClusterError;
use base64::Engine as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Everything needed to build an authenticated HTTP client for the API server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterConnection {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Concatenated client certificate and key PEM for mutual TLS
    pub identity_pem: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct KubeConfigFile {
    #[serde(rename = "current-context", default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<Named<ClusterEntry>>,
    #[serde(default)]
    contexts: Vec<Named<ContextEntry>>,
    #[serde(default)]
    users: Vec<Named<UserEntry>>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context", alias = "user")]
    value: T,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority", default)]
    certificate_authority: Option<PathBuf>,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    token_file: Option<PathBuf>,
    #[serde(rename = "client-certificate", default)]
    client_certificate: Option<PathBuf>,
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key", default)]
    client_key: Option<PathBuf>,
    #[serde(rename = "client-key-data", default)]
    client_key_data: Option<String>,
}

impl ClusterConnection {
    /// Resolve from configuration: a kubeconfig path wins, otherwise the
    /// in-cluster service account is used.
    pub fn resolve(config: &KubernetesConfig) -> Result<Self, ClusterError> {
        if config.config_path.is_empty() {
            Self::in_cluster(Path::new(SERVICE_ACCOUNT_DIR))
        } else {
            let raw = std::fs::read_to_string(&config.config_path).map_err(|e| {
                ClusterError::Config(format!(
                    "failed to read kubeconfig {}: {}",
                    config.config_path, e
                ))
            })?;
            let base = Path::new(&config.config_path)
                .parent()
                .unwrap_or_else(|| Path::new("."));
            Self::from_kubeconfig(&raw, &config.context, base)
        }
    }

    /// Parse a kubeconfig document and select `context`
    /// ("" or "default" selects the file's current context)
    pub fn from_kubeconfig(raw: &str, context: &str, base: &Path) -> Result<Self, ClusterError> {
        let file: KubeConfigFile = serde_yaml::from_str(raw)
            .map_err(|e| ClusterError::Config(format!("invalid kubeconfig: {}", e)))?;

        let wanted = if context.is_empty() || context == "default" {
            file.current_context.as_str()
        } else {
            context
        };

        let ctx = file
            .contexts
            .iter()
            .find(|c| c.name == wanted)
            // a single-context file whose context is literally named "default"
            .or_else(|| file.contexts.iter().find(|c| c.name == context))
            .ok_or_else(|| ClusterError::Config(format!("kubeconfig context {} not found", wanted)))?;

        let cluster = file
            .clusters
            .iter()
            .find(|c| c.name == ctx.value.cluster)
            .ok_or_else(|| {
                ClusterError::Config(format!("kubeconfig cluster {} not found", ctx.value.cluster))
            })?;
        let user = file.users.iter().find(|u| u.name == ctx.value.user);

        let ca_pem = match (
            &cluster.value.certificate_authority_data,
            &cluster.value.certificate_authority,
        ) {
            (Some(data), _) => Some(decode_data(data)?),
            (None, Some(path)) => Some(read_file(&base.join(path))?),
            (None, None) => None,
        };

        let mut connection = ClusterConnection {
            server: cluster.value.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure_skip_tls_verify: cluster.value.insecure_skip_tls_verify,
            token: None,
            identity_pem: None,
        };

        if let Some(user) = user.map(|u| &u.value) {
            connection.token = match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(path)) => Some(read_token(&base.join(path))?),
                (None, None) => None,
            };

            let cert = match (&user.client_certificate_data, &user.client_certificate) {
                (Some(data), _) => Some(decode_data(data)?),
                (None, Some(path)) => Some(read_file(&base.join(path))?),
                (None, None) => None,
            };
            let key = match (&user.client_key_data, &user.client_key) {
                (Some(data), _) => Some(decode_data(data)?),
                (None, Some(path)) => Some(read_file(&base.join(path))?),
                (None, None) => None,
            };
            if let (Some(mut cert), Some(key)) = (cert, key) {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                connection.identity_pem = Some(cert);
            }
        }

        Ok(connection)
    }

    /// Service-account credentials mounted into every pod
    pub fn in_cluster(dir: &Path) -> Result<Self, ClusterError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClusterError::Config(
                "no kubeconfig configured and KUBERNETES_SERVICE_HOST is not set".to_string(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        Ok(ClusterConnection {
            server: format!("https://{}:{}", host, port),
            ca_pem: Some(read_file(&dir.join("ca.crt"))?),
            insecure_skip_tls_verify: false,
            token: Some(read_token(&dir.join("token"))?),
            identity_pem: None,
        })
    }
}

fn decode_data(data: &str) -> Result<Vec<u8>, ClusterError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ClusterError::Config(format!("invalid base64 in kubeconfig: {}", e)))
}

fn read_file(path: &Path) -> Result<Vec<u8>, ClusterError> {
    std::fs::read(path)
        .map_err(|e| ClusterError::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn read_token(path: &Path) -> Result<String, ClusterError> {
    let raw = read_file(path)?;
    Ok(String::from_utf8_lossy(&raw).trim().to_string())
}
