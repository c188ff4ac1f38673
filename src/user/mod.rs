mod memory;
mod postgres;
mod repository;
mod service;

pub use memory::*;
pub use postgres::*;
pub use repository::*;
pub use service::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::{self, Permission, Role};

/// Account status. Only [`UserStatus::Active`] accounts may log in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "Active",
            UserStatus::Inactive => "Inactive",
            UserStatus::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(UserStatus::Active),
            "Inactive" => Ok(UserStatus::Inactive),
            "Suspended" => Ok(UserStatus::Suspended),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

/// User as saved on database.
///
/// `password_hash` and `refresh_token` are never serialized, so every
/// response built from a [`User`] is sanitized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub subject: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub permissions: Vec<Permission>,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create an active user with a fresh id and the default permissions
    /// of `role`.
    pub fn new(
        email: impl AsRef<str>,
        full_name: impl Into<String>,
        role: Role,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email.as_ref()),
            full_name: full_name.into(),
            phone_number: None,
            subject: None,
            role,
            status: UserStatus::Active,
            permissions: permissions::default_permissions(role),
            password_hash: password_hash.into(),
            refresh_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Membership test against the stored permission list.
    pub fn has_permission(&self, capability: &str) -> bool {
        permissions::has_permission(&self.permissions, capability)
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Copy without credential material.
    pub fn sanitized(&self) -> Self {
        Self {
            password_hash: String::default(),
            refresh_token: None,
            ..self.clone()
        }
    }
}

/// Emails are unique case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_strips_credentials() {
        let mut user = User::new("A@B.com", "A B", Role::Teacher, "$2b$10$hash");
        user.refresh_token = Some("refresh".into());

        let json = serde_json::to_value(&user).unwrap();
        let object = json.as_object().unwrap();

        assert!(!object.contains_key("passwordHash"));
        assert!(!object.contains_key("password_hash"));
        assert!(!object.contains_key("refreshToken"));
        assert_eq!(object["email"], "a@b.com");
        assert_eq!(object["fullName"], "A B");
        assert_eq!(object["role"], "Teacher");
        assert_eq!(object["status"], "Active");
        assert!(!json.to_string().contains("$2b$10$hash"));
    }

    #[test]
    fn test_new_user_defaults() {
        let user = User::new(" Teacher@School.org ", "T", Role::Teacher, "");
        assert_eq!(user.email, "teacher@school.org");
        assert!(user.is_active());
        assert_eq!(user.permissions, permissions::default_permissions(Role::Teacher));
        assert!(user.has_permission("edit_lessons"));
        assert!(!user.has_permission("manage_roles"));
    }

    #[test]
    fn test_sanitized() {
        let mut user = User::new("a@b.com", "A B", Role::Admin, "hash");
        user.refresh_token = Some("token".into());

        let clean = user.sanitized();
        assert!(clean.password_hash.is_empty());
        assert!(clean.refresh_token.is_none());
        assert_eq!(clean.id, user.id);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Suspended".parse::<UserStatus>(), Ok(UserStatus::Suspended));
        assert!("active".parse::<UserStatus>().is_err());
    }
}
