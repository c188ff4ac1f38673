//! Manage json web tokens.
//!
//! Access and refresh tokens are both HS256 JWTs, signed with two distinct
//! secrets so one can never be replayed as the other.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::config::Token as TokenConfig;
use crate::error::{Result, ServerError};
use crate::user::User;

const JTI_LENGTH: usize = 16;

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    /// Issued at, in seconds.
    pub iat: u64,
    /// Expiration time, in seconds.
    pub exp: u64,
    /// Unique token identifier.
    pub jti: String,
}

/// Claims carried by a refresh token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// User ID.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl Keys {
    fn new(secret: &str, expiry: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry,
        }
    }
}

/// Issue and verify JWT tokens.
pub struct TokenManager {
    algorithm: Algorithm,
    access: Keys,
    refresh: Keys,
}

impl TokenManager {
    /// Create a new [`TokenManager`].
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            access: Keys::new(&config.access_secret, config.access_expiry),
            refresh: Keys::new(&config.refresh_secret, config.refresh_expiry),
        }
    }

    /// Lifetime of refresh tokens.
    pub fn refresh_expiry(&self) -> Duration {
        self.refresh.expiry
    }

    /// Sign a new access token for `user`.
    pub fn issue_access_token(&self, user: &User) -> Result<String> {
        self.issue_access_token_at(user, now()?)
    }

    /// Sign an access token as if the clock read `issued_at`.
    pub fn issue_access_token_at(&self, user: &User, issued_at: u64) -> Result<String> {
        let claims = AccessClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.full_name.clone(),
            phone: user.phone_number.clone(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.access.expiry.as_secs()),
            jti: jti(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.access.encoding)
            .map_err(|err| ServerError::internal("cannot sign access token", err))
    }

    /// Sign a new refresh token for `user`.
    pub fn issue_refresh_token(&self, user: &User) -> Result<String> {
        self.issue_refresh_token_at(user, now()?)
    }

    pub fn issue_refresh_token_at(&self, user: &User, issued_at: u64) -> Result<String> {
        let claims = RefreshClaims {
            sub: user.id.clone(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.refresh.expiry.as_secs()),
            jti: jti(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.refresh.encoding)
            .map_err(|err| ServerError::internal("cannot sign refresh token", err))
    }

    /// Check signature and expiry of an access token.
    pub fn decode_access(&self, token: &str) -> Result<AccessClaims> {
        decode::<AccessClaims>(token, &self.access.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(reject)
    }

    /// Check signature and expiry of a refresh token.
    pub fn decode_refresh(&self, token: &str) -> Result<RefreshClaims> {
        decode::<RefreshClaims>(token, &self.refresh.decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(reject)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &self.algorithm)
            .field("access_expiry", &self.access.expiry)
            .field("refresh_expiry", &self.refresh.expiry)
            .finish()
    }
}

fn reject(err: jsonwebtoken::errors::Error) -> ServerError {
    match err.kind() {
        ErrorKind::ExpiredSignature => tracing::debug!("expired token rejected"),
        kind => tracing::debug!(?kind, "malformed token rejected"),
    }
    ServerError::InvalidToken
}

fn jti() -> String {
    Alphanumeric.sample_string(&mut OsRng, JTI_LENGTH)
}

fn now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|err| ServerError::internal("system clock before unix epoch", err))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::permissions::Role;

    pub(crate) fn config() -> TokenConfig {
        TokenConfig {
            access_secret: "access-secret-for-tests".into(),
            refresh_secret: "refresh-secret-for-tests".into(),
            access_expiry: Duration::from_secs(3600),
            refresh_expiry: Duration::from_secs(604_800),
        }
    }

    fn user() -> User {
        User {
            id: "0b7c1c2e-6a55-4bd4-a3a0-6f1e5c1c9a10".into(),
            phone_number: Some("+33600000000".into()),
            ..User::new("a@b.com", "A B", Role::Teacher, "")
        }
    }

    #[test]
    fn test_access_claims() {
        let tokens = TokenManager::new(&config());
        let token = tokens.issue_access_token(&user()).unwrap();
        let claims = tokens.decode_access(&token).unwrap();

        assert_eq!(claims.sub, user().id);
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.name, "A B");
        assert_eq!(claims.phone.as_deref(), Some("+33600000000"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens = TokenManager::new(&config());
        let first = tokens.issue_access_token_at(&user(), 1_000).unwrap();
        let second = tokens.issue_access_token_at(&user(), 1_000).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_expired_access_token() {
        let tokens = TokenManager::new(&config());
        let issued_at = now().unwrap() - 7200;
        let token = tokens.issue_access_token_at(&user(), issued_at).unwrap();

        assert!(matches!(
            tokens.decode_access(&token),
            Err(ServerError::InvalidToken)
        ));
    }

    #[test]
    fn test_secrets_are_not_interchangeable() {
        let tokens = TokenManager::new(&config());
        let refresh = tokens.issue_refresh_token(&user()).unwrap();
        let access = tokens.issue_access_token(&user()).unwrap();

        assert!(tokens.decode_refresh(&refresh).is_ok());
        assert!(matches!(
            tokens.decode_access(&refresh),
            Err(ServerError::InvalidToken)
        ));
        assert!(matches!(
            tokens.decode_refresh(&access),
            Err(ServerError::InvalidToken)
        ));
    }

    #[test]
    fn test_tampered_token() {
        let tokens = TokenManager::new(&config());
        let other = TokenManager::new(&TokenConfig {
            access_secret: "another-secret".into(),
            ..config()
        });
        let token = other.issue_access_token(&user()).unwrap();

        assert!(matches!(
            tokens.decode_access(&token),
            Err(ServerError::InvalidToken)
        ));
        assert!(matches!(
            tokens.decode_access("not.a.jwt"),
            Err(ServerError::InvalidToken)
        ));
    }

    #[test]
    fn test_huge_expiry_saturates() {
        let tokens = TokenManager::new(&TokenConfig {
            access_expiry: Duration::from_secs(u64::MAX),
            refresh_expiry: Duration::MAX,
            ..config()
        });

        let token = tokens.issue_access_token(&user()).unwrap();
        assert_eq!(tokens.decode_access(&token).unwrap().exp, u64::MAX);

        let token = tokens.issue_refresh_token(&user()).unwrap();
        assert_eq!(tokens.decode_refresh(&token).unwrap().exp, u64::MAX);
    }

    #[test]
    fn test_refresh_expiry() {
        let tokens = TokenManager::new(&config());
        let token = tokens.issue_refresh_token(&user()).unwrap();
        let claims = tokens.decode_refresh(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 604_800);
        assert_eq!(claims.sub, user().id);
    }
}
