//! HTTP API of the authentication core.

pub mod admin;
pub mod login;
pub mod permissions;
pub mod profile;
pub mod refresh_token;
pub mod register;
pub mod status;

use axum::extract::{FromRequest, Request};
use axum::middleware;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::AppState;
use crate::error::ServerError;
use crate::middleware::{Guard, enforce};
use crate::permissions::{MANAGE_ROLES, MANAGE_USERS, Role};

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Plain confirmation body.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

/// Routes mounted under `/auth`.
pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        // `POST /auth/register` goes to `register`.
        .route("/register", post(register::handler))
        .route("/login", post(login::login))
        .route("/access-token", post(refresh_token::handler))
        .route("/permissions", get(permissions::handler));

    let authenticated = Router::new()
        .route("/logout", post(login::logout))
        .route("/profile", get(profile::get))
        .route("/users/profile", put(profile::update))
        .route("/profile/{id}/change-password", post(profile::change_password))
        .route_layer(middleware::from_fn_with_state(
            Guard::authenticated().with_state(state),
            enforce,
        ));

    let user_managers = Router::new()
        .route("/users", get(admin::list))
        .route_layer(middleware::from_fn_with_state(
            Guard::authenticated()
                .permissions([MANAGE_USERS])
                .with_state(state),
            enforce,
        ));

    let role_managers = Router::new()
        .route("/users/{id}/access", put(admin::update_access))
        .route_layer(middleware::from_fn_with_state(
            Guard::authenticated()
                .roles([Role::Admin, Role::SuperAdmin])
                .permissions([MANAGE_ROLES])
                .with_state(state),
            enforce,
        ));

    public
        .merge(authenticated)
        .merge(user_managers)
        .merge(role_managers)
}
