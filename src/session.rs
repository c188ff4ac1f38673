//! Login, refresh and logout.
//!
//! Each user owns a single refresh-token slot. Login overwrites it, logout
//! clears it, and a refresh token is only honored while it is byte-equal to
//! the stored value.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::token::TokenManager;
use crate::user::{User, UserRepository, normalize_email};

/// Login payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Credentials {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

/// Tokens handed out at login.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
}

const DUMMY_PASSWORD: &str = "campus-auth-unknown-account";

#[derive(Clone)]
pub struct SessionService {
    repo: Arc<dyn UserRepository>,
    crypto: PasswordManager,
    token: Arc<TokenManager>,
    /// Compared against when the email is unknown.
    dummy_hash: Arc<OnceLock<String>>,
}

fn record(metric: &'static str, outcome: &'static str) {
    metrics::counter!(metric, "outcome" => outcome).increment(1);
}

/// Rejection of a non-active account.
pub(crate) fn inactive(user: &User) -> ServerError {
    ServerError::Forbidden(format!(
        "Account is {}",
        user.status.as_str().to_lowercase()
    ))
}

impl SessionService {
    /// Create a new [`SessionService`].
    pub fn new(
        repo: Arc<dyn UserRepository>,
        crypto: PasswordManager,
        token: Arc<TokenManager>,
    ) -> Self {
        Self {
            repo,
            crypto,
            token,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    fn dummy_hash(&self) -> &str {
        self.dummy_hash.get_or_init(|| {
            self.crypto.hash(DUMMY_PASSWORD).unwrap_or_else(|err| {
                tracing::error!(error = %err, "cannot hash placeholder password");
                String::default()
            })
        })
    }

    /// Check credentials and open a session.
    ///
    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, credentials: &Credentials) -> Result<(User, SessionPair)> {
        let email = normalize_email(&credentials.email);

        let user = self.repo.find_by_email(&email).await?;
        let hash = match &user {
            Some(user) => user.password_hash.as_str(),
            None => self.dummy_hash(),
        };
        let verified = self.crypto.verify(&credentials.password, hash);

        let user = match user {
            Some(user) if verified => user,
            _ => {
                tracing::debug!("login rejected");
                record("auth_login_total", "invalid_credentials");
                return Err(ServerError::InvalidCredentials);
            },
        };

        if !user.is_active() {
            tracing::warn!(user_id = %user.id, status = %user.status, "inactive account login");
            record("auth_login_total", "inactive");
            return Err(inactive(&user));
        }

        let pair = self.issue_session_pair(&user.id).await?;
        record("auth_login_total", "success");
        tracing::info!(user_id = %user.id, "user logged in");

        Ok((user, pair))
    }

    /// Sign both tokens for `user_id` and store the refresh token in the
    /// user's slot, replacing any previous one.
    pub async fn issue_session_pair(&self, user_id: &str) -> Result<SessionPair> {
        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ServerError::NotFound("user".into()))?;

        let access_token = self.token.issue_access_token(&user)?;
        let refresh_token = self.token.issue_refresh_token(&user)?;
        self.repo
            .set_refresh_token(&user.id, Some(&refresh_token))
            .await?;

        Ok(SessionPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange the stored refresh token of `user_id` for a new access
    /// token. The refresh token itself is not rotated.
    pub async fn refresh(&self, user_id: &str, presented: Option<&str>) -> Result<String> {
        let Some(user) = self.repo.find_by_id(user_id).await? else {
            record("auth_refresh_total", "unknown_user");
            return Err(ServerError::Unauthenticated);
        };

        if !user.is_active() {
            tracing::warn!(user_id = %user.id, status = %user.status, "refresh on inactive account");
            record("auth_refresh_total", "inactive");
            return Err(inactive(&user));
        }

        match (presented, user.refresh_token.as_deref()) {
            (Some(presented), Some(stored)) if presented == stored => {},
            _ => {
                tracing::debug!(user_id = %user.id, "refresh token does not match slot");
                record("auth_refresh_total", "rejected");
                return Err(ServerError::InvalidToken);
            },
        }

        let access_token = self.token.issue_access_token(&user)?;
        record("auth_refresh_total", "success");

        Ok(access_token)
    }

    /// Verify a presented refresh token and exchange it.
    ///
    /// The user id is read from the token's verified subject.
    pub async fn refresh_with_token(&self, presented: Option<&str>) -> Result<String> {
        let Some(token) = presented.filter(|t| !t.is_empty()) else {
            record("auth_refresh_total", "missing");
            return Err(ServerError::InvalidToken);
        };

        let claims = self.token.decode_refresh(token).inspect_err(|_| {
            record("auth_refresh_total", "rejected");
        })?;
        self.refresh(&claims.sub, Some(token)).await
    }

    /// Clear the refresh-token slot of `user_id`.
    pub async fn logout(&self, user_id: &str) -> Result<()> {
        self.repo.set_refresh_token(user_id, None).await?;
        tracing::info!(%user_id, "user logged out");
        Ok(())
    }
}
