//! Middlewares for routes.
//!
//! Every protected route goes through [`enforce`], configured by a [`Guard`]:
//! the access token is verified and the user loaded first. Non-active
//! accounts are refused, then roles and permissions are checked against
//! that user.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::permissions::Role;
use crate::user::User;

const BEARER: &str = "Bearer ";

/// Authenticated caller, attached to the request by [`enforce`].
///
/// Credential fields are stripped before insertion.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: Arc<User>,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(ServerError::Unauthenticated)
    }
}

/// Access rule of a group of routes.
///
/// A guard always authenticates; role and permission requirements are
/// checked afterwards, on the loaded user.
#[derive(Clone, Debug, Default)]
pub struct Guard {
    roles: Option<Vec<Role>>,
    permissions: Vec<&'static str>,
}

impl Guard {
    /// Any authenticated user.
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Restrict to users holding one of `roles`.
    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles
            .get_or_insert_with(Vec::new)
            .extend(roles);
        self
    }

    /// Require every capability of `permissions`.
    pub fn permissions(mut self, permissions: impl IntoIterator<Item = &'static str>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    /// Check an authenticated `user` against this guard.
    pub fn authorize(&self, user: &User) -> Result<()> {
        if let Some(roles) = &self.roles {
            if !roles.contains(&user.role) {
                tracing::debug!(user_id = %user.id, role = %user.role, "role not allowed");
                return Err(ServerError::Forbidden(format!(
                    "Role {} is not allowed",
                    user.role
                )));
            }
        }

        if let Some(missing) = self
            .permissions
            .iter()
            .find(|capability| !user.has_permission(capability))
        {
            tracing::debug!(user_id = %user.id, permission = %missing, "missing permission");
            return Err(ServerError::Forbidden(format!(
                "Missing permission {missing}"
            )));
        }

        Ok(())
    }

    /// Bind this guard to the application state, for [`enforce`].
    pub fn with_state(self, state: &AppState) -> GuardState {
        GuardState {
            app: state.clone(),
            guard: Arc::new(self),
        }
    }
}

/// State of the [`enforce`] middleware.
#[derive(Clone)]
pub struct GuardState {
    app: AppState,
    guard: Arc<Guard>,
}

/// Read the access token: cookie first, then `Authorization: Bearer`.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie = CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty());

    cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER))
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
    })
}

/// Middleware guarding a group of routes.
pub async fn enforce(
    State(GuardState { app, guard }): State<GuardState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = extract_token(req.headers(), &app.config.cookie.access_name)
        .ok_or(ServerError::Unauthenticated)?;
    let claims = app.token.decode_access(&token)?;

    let Some(user) = app.repo.find_by_id(&claims.sub).await? else {
        tracing::debug!(user_id = %claims.sub, "token subject no longer exists");
        return Err(ServerError::Unauthenticated);
    };

    if !user.is_active() {
        tracing::debug!(user_id = %user.id, status = %user.status, "inactive account rejected");
        return Err(crate::session::inactive(&user));
    }
    guard.authorize(&user)?;

    req.extensions_mut().insert(AuthContext {
        user: Arc::new(user.sanitized()),
    });
    Ok(next.run(req).await)
}
