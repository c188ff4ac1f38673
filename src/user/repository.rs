//! Credential store port.

use async_trait::async_trait;

use crate::error::Result;
use crate::user::User;

/// Persistence of [`User`] records.
///
/// Owned by the domain persistence layer; the authentication core only
/// relies on the operations below. `update` never writes `password_hash`
/// or `refresh_token`: those have dedicated writers.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user using `id` field.
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    /// Find a user using normalized `email` field.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Every user, oldest first.
    async fn list(&self) -> Result<Vec<User>>;

    /// Insert [`User`] into database.
    ///
    /// Fails with `Conflict` when the email is already in use.
    async fn insert(&self, user: &User) -> Result<()>;

    /// Update profile, role, status and permissions.
    async fn update(&self, user: &User) -> Result<()>;

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()>;

    /// Overwrite the single refresh-token slot.
    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<()>;
}
