//! Open and close sessions.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, header};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::config::Configuration;
use crate::error::{Result, ServerError};
use crate::middleware::AuthContext;
use crate::router::{Message, Valid};
use crate::session::Credentials;
use crate::user::User;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub user: User,
    pub access_token: String,
}

/// `Set-Cookie` value carrying the refresh token.
pub fn refresh_cookie(config: &Configuration, token: &str, max_age: u64) -> String {
    let secure = if config.environment.is_production() {
        "; Secure"
    } else {
        ""
    };

    format!(
        "{}={}; Path={}; HttpOnly; SameSite=Strict; Max-Age={}{}",
        config.cookie.refresh_name, token, config.cookie.path, max_age, secure
    )
}

fn set_cookie(value: String) -> Result<HeaderMap> {
    let value = HeaderValue::from_str(&value)
        .map_err(|err| ServerError::internal("invalid cookie value", err))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

/// Handler to log in.
pub async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<Credentials>,
) -> Result<(HeaderMap, Json<Response>)> {
    let (user, pair) = state.sessions.login(&body).await?;

    let cookie = refresh_cookie(
        &state.config,
        &pair.refresh_token,
        state.token.refresh_expiry().as_secs(),
    );

    Ok((
        set_cookie(cookie)?,
        Json(Response {
            user,
            access_token: pair.access_token,
        }),
    ))
}

/// Handler to log out. Clears the refresh slot and cookie.
pub async fn logout(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> Result<(HeaderMap, Json<Message>)> {
    state.sessions.logout(&ctx.user.id).await?;

    Ok((
        set_cookie(refresh_cookie(&state.config, "", 0))?,
        Json(Message {
            message: "Logged out",
        }),
    ))
}
