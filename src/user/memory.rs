//! In-memory credential store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::user::{User, UserRepository};

const EMAIL_IN_USE: &str = "Email already in use";

/// [`UserRepository`] kept in process memory.
///
/// Used when no PostgreSQL instance is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found() -> ServerError {
    ServerError::NotFound("user".into())
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(ServerError::Conflict(EMAIL_IN_USE.into()));
        }
        if users.contains_key(&user.id) {
            return Err(ServerError::Conflict("User already exists".into()));
        }

        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(ServerError::Conflict(EMAIL_IN_USE.into()));
        }

        let stored = users.get_mut(&user.id).ok_or_else(not_found)?;
        stored.email = user.email.clone();
        stored.full_name = user.full_name.clone();
        stored.phone_number = user.phone_number.clone();
        stored.subject = user.subject.clone();
        stored.role = user.role;
        stored.status = user.status;
        stored.permissions = user.permissions.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let stored = users.get_mut(id).ok_or_else(not_found)?;
        stored.password_hash = password_hash.to_owned();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<()> {
        let mut users = self.users.write().await;
        let stored = users.get_mut(id).ok_or_else(not_found)?;
        stored.refresh_token = token.map(str::to_owned);
        Ok(())
    }
}
