//! Client-side session handling.
//!
//! [`SessionManager`] keeps the signed-in user and access token, restores
//! them at boot and transparently refreshes the access token when a
//! protected request is rejected. The refresh token never leaves the HTTP
//! cookie jar.

mod api;
mod session;
mod storage;

pub use api::*;
pub use session::*;
pub use storage::*;

use std::sync::Arc;

use thiserror::Error;

/// Errors seen by client code.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    /// 401 from the server. `invalid_token` tells an expired or revoked
    /// token apart from missing credentials.
    #[error("request rejected as unauthorized")]
    Unauthorized { invalid_token: bool },

    #[error("server returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("token refresh timed out")]
    Timeout,

    #[error("token refresh failed: {0}")]
    Refresh(Arc<ClientError>),

    #[error("no active session")]
    LoggedOut,

    #[error("session storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("corrupted session data: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether a token refresh could fix this error.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ClientError::Unauthorized { .. } => true,
            ClientError::Refresh(inner) => inner.is_unauthorized(),
            _ => false,
        }
    }
}
