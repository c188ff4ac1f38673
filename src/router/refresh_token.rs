//! Get a new access token with the refresh token.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{Result, ServerError};

/// Body accepted from clients without a cookie jar.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub access_token: String,
}

pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<Response>> {
    let from_cookie = jar
        .get(&state.config.cookie.refresh_name)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty());

    let presented = match from_cookie {
        Some(token) => Some(token),
        None if body.is_empty() => None,
        None => {
            serde_json::from_slice::<Body>(&body)
                .map_err(|err| ServerError::ParsingForm(Box::new(err)))?
                .refresh_token
        },
    };

    let access_token = state
        .sessions
        .refresh_with_token(presented.as_deref())
        .await?;

    Ok(Json(Response { access_token }))
}
