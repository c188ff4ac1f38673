//! Caller's own account.

use axum::Json;
use axum::extract::{Path, State};

use crate::AppState;
use crate::error::Result;
use crate::middleware::AuthContext;
use crate::router::{Message, Valid};
use crate::user::{PasswordChange, ProfileUpdate, User};

/// Current user, sanitized.
pub async fn get(ctx: AuthContext) -> Json<User> {
    Json(User::clone(&ctx.user))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: AuthContext,
    Valid(body): Valid<ProfileUpdate>,
) -> Result<Json<User>> {
    let user = state.users.update_profile(&ctx.user, body).await?;

    Ok(Json(user))
}

pub async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: AuthContext,
    Valid(body): Valid<PasswordChange>,
) -> Result<Json<Message>> {
    state.users.change_password(&ctx.user, &id, body).await?;

    Ok(Json(Message {
        message: "Password updated",
    }))
}
