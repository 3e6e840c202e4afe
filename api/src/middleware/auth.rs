use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::security::Auth;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

pub const EMAIL_HEADER: &str = "Email-Id";
pub const TOKEN_HEADER: &str = "Access-Token";

/// Authenticate the caller from the `Email-Id` and `Access-Token` headers and
/// hand the resolved `UserIdentity` to handlers through request extensions
#[tracing::instrument(skip(state, req, next), fields(path = %req.uri().path()))]
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let (email, token) = {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        };
        (header(EMAIL_HEADER), header(TOKEN_HEADER))
    };

    let (Some(email), Some(token)) = (email, token) else {
        tracing::warn!("Missing authentication headers");
        return ErrorResponse::new(
            "unauthorized",
            format!("{} and {} headers are required", EMAIL_HEADER, TOKEN_HEADER),
        )
        .into_response();
    };

    let user = match state.security.authenticate(&email, &token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(email = %email, error = %e, "Authentication failed");
            return ErrorResponse::from(e).into_response();
        }
    };

    if !user.active {
        tracing::warn!(email = %email, "Inactive user rejected");
        return ErrorResponse::new("forbidden", format!("User {} is not active", email))
            .into_response();
    }

    tracing::info!(
        email = %user.email,
        method = %req.method(),
        "API operation"
    );

    req.extensions_mut().insert(user);
    next.run(req).await
}
