use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::{Registration, User};

/// Handler to create user.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Registration>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.users.register(body).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::fixtures::{body, make_request, state};
    use crate::*;

    #[tokio::test]
    async fn test_register_teacher() {
        let state = state();
        let app = app(state.clone());

        let response = make_request(
            None,
            app,
            Method::POST,
            "/auth/register",
            json!({
                "email": "a@b.com",
                "password": "password123",
                "fullName": "A B",
                "role": "Teacher",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let user = body(response).await;
        assert_eq!(
            user["permissions"],
            json!(["view_teachers", "view_lessons", "edit_lessons"])
        );
        assert_eq!(user["email"], "a@b.com");
        assert_eq!(user["status"], "Active");
        assert!(user.get("passwordHash").is_none());
        assert!(user.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn test_register_invalid_body() {
        let state = state();

        for payload in [
            json!({"email": "a@b.com", "password": "short", "fullName": "A", "role": "Teacher"}),
            json!({"email": "not-an-email", "password": "password123", "fullName": "A", "role": "Teacher"}),
            json!({"email": "a@b.com", "password": "password123", "fullName": "A", "role": "Janitor"}),
            json!({"email": "a@b.com", "password": "password123", "role": "Teacher"}),
        ] {
            let response = make_request(
                None,
                app(state.clone()),
                Method::POST,
                "/auth/register",
                payload.to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let state = state();
        let payload = json!({
            "email": "a@b.com",
            "password": "password123",
            "fullName": "A B",
            "role": "Teacher",
        });

        let first = make_request(
            None,
            app(state.clone()),
            Method::POST,
            "/auth/register",
            payload.to_string(),
        )
        .await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = make_request(
            None,
            app(state.clone()),
            Method::POST,
            "/auth/register",
            payload.to_string(),
        )
        .await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }
}
