//! Role to capability matrix.
//!
//! The table below is the only definition of default permissions. It seeds
//! the permission list of newly registered users and is published to
//! clients through `GET /auth/permissions`, tagged with
//! [`PERMISSIONS_VERSION`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bumped whenever [`default_permissions`] changes.
pub const PERMISSIONS_VERSION: u32 = 1;

pub const VIEW_TEACHERS: &str = "view_teachers";
pub const EDIT_TEACHERS: &str = "edit_teachers";
pub const VIEW_CLASSES: &str = "view_classes";
pub const EDIT_CLASSES: &str = "edit_classes";
pub const VIEW_CHAPTERS: &str = "view_chapters";
pub const EDIT_CHAPTERS: &str = "edit_chapters";
pub const VIEW_LESSONS: &str = "view_lessons";
pub const EDIT_LESSONS: &str = "edit_lessons";
pub const VIEW_SCHEDULES: &str = "view_schedules";
pub const EDIT_SCHEDULES: &str = "edit_schedules";
pub const VIEW_STUDENTS: &str = "view_students";
pub const EDIT_STUDENTS: &str = "edit_students";
pub const VIEW_COMMENTS: &str = "view_comments";
pub const EDIT_COMMENTS: &str = "edit_comments";
pub const MANAGE_USERS: &str = "manage_users";
pub const MANAGE_ROLES: &str = "manage_roles";
pub const MANAGE_SYSTEM: &str = "manage_system";

const TEACHER: &[&str] = &[VIEW_TEACHERS, VIEW_LESSONS, EDIT_LESSONS];

const HEAD_TEACHER: &[&str] = &[
    VIEW_TEACHERS,
    VIEW_CLASSES,
    VIEW_CHAPTERS,
    EDIT_CHAPTERS,
    VIEW_LESSONS,
    EDIT_LESSONS,
    VIEW_SCHEDULES,
    EDIT_SCHEDULES,
    VIEW_STUDENTS,
    VIEW_COMMENTS,
    EDIT_COMMENTS,
];

const ADMIN: &[&str] = &[
    VIEW_TEACHERS,
    EDIT_TEACHERS,
    VIEW_CLASSES,
    EDIT_CLASSES,
    VIEW_CHAPTERS,
    EDIT_CHAPTERS,
    VIEW_LESSONS,
    EDIT_LESSONS,
    VIEW_SCHEDULES,
    EDIT_SCHEDULES,
    VIEW_STUDENTS,
    EDIT_STUDENTS,
    VIEW_COMMENTS,
    EDIT_COMMENTS,
    MANAGE_USERS,
];

const SUPER_ADMIN: &[&str] = &[
    VIEW_TEACHERS,
    EDIT_TEACHERS,
    VIEW_CLASSES,
    EDIT_CLASSES,
    VIEW_CHAPTERS,
    EDIT_CHAPTERS,
    VIEW_LESSONS,
    EDIT_LESSONS,
    VIEW_SCHEDULES,
    EDIT_SCHEDULES,
    VIEW_STUDENTS,
    EDIT_STUDENTS,
    VIEW_COMMENTS,
    EDIT_COMMENTS,
    MANAGE_USERS,
    MANAGE_ROLES,
    MANAGE_SYSTEM,
];

/// Closed set of roles a user can hold.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Role {
    Teacher,
    HeadTeacher,
    Admin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Teacher,
        Role::HeadTeacher,
        Role::Admin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "Teacher",
            Role::HeadTeacher => "HeadTeacher",
            Role::Admin => "Admin",
            Role::SuperAdmin => "SuperAdmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

/// Opaque capability string.
///
/// Checked by exact equality only; there is no hierarchy and no wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl PartialEq<str> for Permission {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// Default permission set of `role`.
pub fn default_permissions(role: Role) -> Vec<Permission> {
    let names = match role {
        Role::Teacher => TEACHER,
        Role::HeadTeacher => HEAD_TEACHER,
        Role::Admin => ADMIN,
        Role::SuperAdmin => SUPER_ADMIN,
    };

    names.iter().copied().map(Permission::new).collect()
}

/// Remove duplicates while keeping the first occurrence order.
pub fn normalize(permissions: impl IntoIterator<Item = Permission>) -> Vec<Permission> {
    let mut seen = Vec::new();
    for permission in permissions {
        if !seen.contains(&permission) {
            seen.push(permission);
        }
    }
    seen
}

/// Membership test against a stored permission list.
pub fn has_permission(granted: &[Permission], capability: &str) -> bool {
    granted.iter().any(|p| p == capability)
}

/// Serializable snapshot of the whole matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionTable {
    pub version: u32,
    pub roles: BTreeMap<Role, Vec<Permission>>,
}

impl PermissionTable {
    /// Table compiled into this binary.
    pub fn current() -> Self {
        Self {
            version: PERMISSIONS_VERSION,
            roles: Role::ALL
                .into_iter()
                .map(|role| (role, default_permissions(role)))
                .collect(),
        }
    }

    pub fn for_role(&self, role: Role) -> Vec<Permission> {
        self.roles.get(&role).cloned().unwrap_or_default()
    }
}
