use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::permissions::{self, MANAGE_ROLES, Permission, Role};
use crate::user::{User, UserRepository, UserStatus, normalize_email};

const EMAIL_IN_USE: &str = "Email already in use";
/// bcrypt ignores input past this length.
const MAX_PASSWORD_BYTES: usize = 72;

fn password_bytes(password: &str) -> std::result::Result<(), ValidationError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ValidationError::new("length")
            .with_message("Password must not exceed 72 bytes.".into()));
    }
    Ok(())
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(
        length(min = 8, message = "Password must contain at least 8 characters."),
        custom(function = "password_bytes")
    )]
    pub password: String,
    #[validate(length(min = 1, max = 255, message = "Full name is required."))]
    pub full_name: String,
    pub role: Role,
    #[validate(length(max = 32))]
    pub phone_number: Option<String>,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    pub status: Option<UserStatus>,
    pub permissions: Option<Vec<Permission>>,
}

/// Self-service profile changes.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 255, message = "Full name cannot be empty."))]
    pub full_name: Option<String>,
    #[validate(length(max = 32))]
    pub phone_number: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

/// Administrative access changes.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccessUpdate {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub permissions: Option<Vec<Permission>>,
}

/// Password change payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    #[validate(length(min = 1, message = "Old password is required."))]
    pub old_password: String,
    #[validate(
        length(min = 8, message = "Password must contain at least 8 characters."),
        custom(function = "password_bytes")
    )]
    pub new_password: String,
}

/// User manager.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    crypto: PasswordManager,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(repo: Arc<dyn UserRepository>, crypto: PasswordManager) -> Self {
        Self { repo, crypto }
    }

    /// Create a user, seeding permissions from its role unless an explicit
    /// list is supplied.
    pub async fn register(&self, registration: Registration) -> Result<User> {
        let email = normalize_email(&registration.email);
        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(ServerError::Conflict(EMAIL_IN_USE.into()));
        }

        let password_hash = self
            .crypto
            .hash(&registration.password)
            .map_err(|err| ServerError::internal("cannot hash password", err))?;

        let mut user = User::new(
            email,
            registration.full_name.trim(),
            registration.role,
            password_hash,
        );
        user.phone_number = registration.phone_number;
        user.subject = registration.subject;
        user.status = registration.status.unwrap_or_default();
        if let Some(list) = registration.permissions {
            user.permissions = permissions::normalize(list);
        }

        self.repo.insert(&user).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");

        Ok(user)
    }

    /// Find a user by id, failing with `NotFound`.
    pub async fn get(&self, id: &str) -> Result<User> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServerError::NotFound("user".into()))
    }

    /// Every user.
    pub async fn list(&self) -> Result<Vec<User>> {
        self.repo.list().await
    }

    /// Apply `update` to the caller's own record.
    ///
    /// Changing one's own role or status requires `manage_roles`.
    pub async fn update_profile(&self, caller: &User, update: ProfileUpdate) -> Result<User> {
        let mut user = self.get(&caller.id).await?;

        let role_change = update.role.filter(|role| *role != user.role);
        let status_change = update.status.filter(|status| *status != user.status);
        if (role_change.is_some() || status_change.is_some()) && !user.has_permission(MANAGE_ROLES)
        {
            tracing::warn!(user_id = %user.id, "role or status change without manage_roles");
            return Err(ServerError::Forbidden(
                "Changing role or status requires the manage_roles permission".into(),
            ));
        }

        if let Some(email) = update.email.as_deref().map(normalize_email) {
            if email != user.email {
                let taken = self
                    .repo
                    .find_by_email(&email)
                    .await?
                    .is_some_and(|other| other.id != user.id);
                if taken {
                    return Err(ServerError::Conflict(EMAIL_IN_USE.into()));
                }
                user.email = email;
            }
        }
        if let Some(full_name) = update.full_name {
            user.full_name = full_name.trim().to_owned();
        }
        if let Some(phone_number) = update.phone_number {
            user.phone_number = Some(phone_number).filter(|p| !p.is_empty());
        }
        if let Some(subject) = update.subject {
            user.subject = Some(subject).filter(|s| !s.is_empty());
        }
        if let Some(role) = role_change {
            user.role = role;
            user.permissions = permissions::default_permissions(role);
        }
        if let Some(status) = status_change {
            user.status = status;
        }

        user.updated_at = Utc::now();
        self.repo.update(&user).await?;
        if !user.is_active() {
            self.repo.set_refresh_token(&user.id, None).await?;
        }

        Ok(user)
    }

    /// Replace the password of `target_id`, which must be the caller.
    pub async fn change_password(
        &self,
        caller: &User,
        target_id: &str,
        change: PasswordChange,
    ) -> Result<()> {
        if caller.id != target_id {
            return Err(ServerError::Forbidden(
                "Cannot change another user's password".into(),
            ));
        }

        let user = self.get(target_id).await?;
        if !self.crypto.verify(&change.old_password, &user.password_hash) {
            tracing::debug!(user_id = %user.id, "old password mismatch");
            return Err(ServerError::InvalidCredentials);
        }

        let password_hash = self
            .crypto
            .hash(&change.new_password)
            .map_err(|err| ServerError::internal("cannot hash password", err))?;
        self.repo.set_password_hash(&user.id, &password_hash).await?;
        tracing::info!(user_id = %user.id, "password changed");

        Ok(())
    }

    /// Change role, status or permissions of another user.
    ///
    /// A role change without an explicit list re-seeds the role defaults.
    pub async fn update_access(&self, target_id: &str, update: AccessUpdate) -> Result<User> {
        let mut user = self.get(target_id).await?;

        if let Some(role) = update.role {
            user.role = role;
            user.permissions = permissions::default_permissions(role);
        }
        if let Some(list) = update.permissions {
            user.permissions = permissions::normalize(list);
        }
        if let Some(status) = update.status {
            user.status = status;
        }

        user.updated_at = Utc::now();
        self.repo.update(&user).await?;
        if !user.is_active() {
            // Ends the session held by the refresh cookie.
            self.repo.set_refresh_token(&user.id, None).await?;
        }
        tracing::info!(
            user_id = %user.id,
            role = %user.role,
            status = %user.status,
            "access updated"
        );

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{crypto, registration};
    use crate::user::MemoryUserRepository;

    fn service() -> UserService {
        UserService::new(Arc::new(MemoryUserRepository::new()), crypto())
    }

    #[tokio::test]
    async fn test_register_seeds_role_defaults() {
        let service = service();
        for (index, role) in Role::ALL.into_iter().enumerate() {
            let user = service
                .register(registration(&format!("user{index}@school.org"), role))
                .await
                .unwrap();

            assert_eq!(user.permissions, permissions::default_permissions(role));
            for capability in [permissions::VIEW_TEACHERS, MANAGE_ROLES, permissions::MANAGE_USERS] {
                assert_eq!(
                    user.has_permission(capability),
                    permissions::default_permissions(role)
                        .iter()
                        .any(|p| p == capability)
                );
            }
        }
    }

    #[test]
    fn test_password_byte_limit() {
        let with_password = |password: String| Registration {
            password,
            ..registration("a@b.com", Role::Teacher)
        };

        assert!(with_password("a".repeat(72)).validate().is_ok());
        assert!(with_password("a".repeat(73)).validate().is_err());
        // 40 characters, 80 bytes.
        assert!(with_password("é".repeat(40)).validate().is_err());

        let change = PasswordChange {
            old_password: "password123".into(),
            new_password: "b".repeat(100),
        };
        let errors = change.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("new_password"));
    }

    #[tokio::test]
    async fn test_register_hashes_password() {
        let service = service();
        let user = service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();

        assert_ne!(user.password_hash, "password123");
        assert!(crypto().verify("password123", &user.password_hash));
    }

    #[tokio::test]
    async fn test_register_explicit_permissions() {
        let service = service();
        let user = service
            .register(Registration {
                permissions: Some(vec![
                    Permission::from("view_students"),
                    Permission::from("view_students"),
                ]),
                ..registration("a@b.com", Role::Teacher)
            })
            .await
            .unwrap();

        assert_eq!(user.permissions, vec![Permission::from("view_students")]);
        assert!(!user.has_permission("edit_lessons"));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let service = service();
        service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();

        let err = service
            .register(registration(" A@B.COM", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_self_promotion_forbidden() {
        let service = service();
        let teacher = service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();

        let err = service
            .update_profile(
                &teacher,
                ProfileUpdate {
                    role: Some(Role::SuperAdmin),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        // Same role is not a change.
        let user = service
            .update_profile(
                &teacher,
                ProfileUpdate {
                    role: Some(Role::Teacher),
                    full_name: Some("Alice".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.full_name, "Alice");
    }

    #[tokio::test]
    async fn test_super_admin_role_change_reseeds() {
        let service = service();
        let admin = service
            .register(registration("root@b.com", Role::SuperAdmin))
            .await
            .unwrap();

        let user = service
            .update_profile(
                &admin,
                ProfileUpdate {
                    role: Some(Role::HeadTeacher),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.role, Role::HeadTeacher);
        assert_eq!(
            user.permissions,
            permissions::default_permissions(Role::HeadTeacher)
        );
    }

    #[tokio::test]
    async fn test_profile_email_collision() {
        let service = service();
        service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();
        let other = service
            .register(registration("c@d.com", Role::Teacher))
            .await
            .unwrap();

        let err = service
            .update_profile(
                &other,
                ProfileUpdate {
                    email: Some("A@b.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_change_password() {
        let service = service();
        let user = service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();
        let change = |old: &str| PasswordChange {
            old_password: old.into(),
            new_password: "new-password".into(),
        };

        let err = service
            .change_password(&user, &user.id, change("wrong-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidCredentials));

        let err = service
            .change_password(&user, "someone-else", change("password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        service
            .change_password(&user, &user.id, change("password123"))
            .await
            .unwrap();
        let stored = service.get(&user.id).await.unwrap();
        assert!(crypto().verify("new-password", &stored.password_hash));
        assert!(!crypto().verify("password123", &stored.password_hash));
    }

    #[tokio::test]
    async fn test_update_access() {
        let service = service();
        let user = service
            .register(registration("a@b.com", Role::Teacher))
            .await
            .unwrap();

        let updated = service
            .update_access(
                &user.id,
                AccessUpdate {
                    role: Some(Role::Admin),
                    status: Some(UserStatus::Suspended),
                    permissions: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.status, UserStatus::Suspended);
        assert_eq!(updated.permissions, permissions::default_permissions(Role::Admin));

        let updated = service
            .update_access(
                &user.id,
                AccessUpdate {
                    permissions: Some(vec![Permission::from("manage_system")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.permissions, vec![Permission::from("manage_system")]);

        assert!(matches!(
            service.update_access("unknown", AccessUpdate::default()).await,
            Err(ServerError::NotFound(_))
        ));
    }
}
