// Security service tests: single-flight plugin loading and the built-in
// JWT capability behind it

use async_trait::async_trait;
use common::config::Settings;
use common::errors::{AuthError, PluginError};
use common::models::UserIdentity;
use common::security::{Auth, JwtAuth, PluginLoader, SecurityService, BUILTIN_PLUGIN};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loader that takes a while and counts how often it ran
struct SlowLoader {
    attempts: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl PluginLoader for SlowLoader {
    async fn load(&self, location: &str, exported: &str) -> Result<Arc<dyn Auth>, PluginError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(PluginError::Lookup {
                location: location.to_string(),
                exported: exported.to_string(),
            });
        }
        Ok(Arc::new(JwtAuth::new("test-secret")))
    }
}

fn ops_user() -> UserIdentity {
    UserIdentity {
        name: "Ops".to_string(),
        email: "ops@example.com".to_string(),
        active: true,
        groups: vec!["ops".to_string()],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_callers_share_one_load() {
    let loader = Arc::new(SlowLoader {
        attempts: AtomicUsize::new(0),
        fail: false,
    });
    let service = Arc::new(SecurityService::new(
        loader.clone(),
        BUILTIN_PLUGIN,
        "Auth",
        Duration::from_secs(30),
    ));
    let token = JwtAuth::new("test-secret")
        .issue_token(&ops_user(), chrono::Duration::hours(1))
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            let token = token.clone();
            tokio::spawn(async move { service.authenticate("ops@example.com", &token).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), ops_user());
    }
    assert_eq!(loader.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(service.state_name().await, "loaded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_all_observe_the_failure() {
    let loader = Arc::new(SlowLoader {
        attempts: AtomicUsize::new(0),
        fail: true,
    });
    let service = Arc::new(SecurityService::new(
        loader.clone(),
        "/plugins/auth",
        "Missing",
        Duration::from_secs(30),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.authenticate("ops@example.com", "t").await })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to Lookup plugin binary from location: /plugins/auth with Exported Name: Missing"
        );
    }
    assert_eq!(loader.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(service.state_name().await, "failed");
}

#[tokio::test]
async fn test_builtin_service_from_settings() {
    let mut settings = Settings::default();
    settings.auth.jwt_secret = "configured-secret".to_string();
    let service = SecurityService::from_config(&settings.auth);

    let token = JwtAuth::new("configured-secret")
        .issue_token(&ops_user(), chrono::Duration::minutes(5))
        .unwrap();
    let user = service.authenticate("ops@example.com", &token).await.unwrap();

    assert!(service.verify(&user, &["ops".to_string()]).await.unwrap());
    assert!(!service.verify(&user, &["finance".to_string()]).await.unwrap());
    assert!(matches!(
        service.authenticate("ops@example.com", "garbage").await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_unknown_builtin_export_is_lookup_error() {
    let mut settings = Settings::default();
    settings.auth.plugin_exported = "Missing".to_string();
    let service = SecurityService::from_config(&settings.auth);

    let err = service.authenticate("ops@example.com", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::Plugin(PluginError::Lookup { .. })));
}
