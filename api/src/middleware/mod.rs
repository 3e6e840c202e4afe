mod auth;

pub use auth::{auth_middleware, EMAIL_HEADER, TOKEN_HEADER};
