// Built-in JWT auth capability (HS256)

use super::{membership_allows, Auth};
use crate::errors::AuthError;
use crate::models::UserIdentity;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Token claims; `sub` is the user's email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub active: bool,
    pub exp: i64,
    pub iat: i64,
}

impl From<IdentityClaims> for UserIdentity {
    fn from(claims: IdentityClaims) -> Self {
        UserIdentity {
            name: claims.name,
            email: claims.sub,
            active: claims.active,
            groups: claims.groups,
        }
    }
}

#[derive(Clone)]
pub struct JwtAuth {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
}

impl JwtAuth {
    #[instrument(skip(secret))]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }

    /// Sign a token carrying `user` that expires after `ttl`
    #[instrument(skip(self, user), fields(email = %user.email))]
    pub fn issue_token(&self, user: &UserIdentity, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: user.email.clone(),
            name: user.name.clone(),
            groups: user.groups.clone(),
            active: user.active,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            error!(error = %e, "Failed to encode JWT token");
            AuthError::InvalidToken(format!("Failed to encode token: {}", e))
        })
    }

    fn decode_claims(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        decode::<IdentityClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(format!("Token validation failed: {}", e)),
            })
    }
}

#[async_trait]
impl Auth for JwtAuth {
    #[instrument(skip(self, token))]
    async fn authenticate(&self, email: &str, token: &str) -> Result<UserIdentity, AuthError> {
        let claims = self.decode_claims(token)?;

        if claims.sub != email {
            warn!(token_subject = %claims.sub, "Token subject does not match email");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(claims.into())
    }

    async fn verify(&self, user: &UserIdentity, groups: &[String]) -> Result<bool, AuthError> {
        Ok(membership_allows(user, groups))
    }
}
