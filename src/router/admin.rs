//! User administration.

use axum::Json;
use axum::extract::{Path, State};

use crate::AppState;
use crate::error::Result;
use crate::middleware::AuthContext;
use crate::router::Valid;
use crate::user::{AccessUpdate, User};

/// Every user, sanitized.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.users.list().await?))
}

/// Change role, status or permissions of a user.
pub async fn update_access(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: AuthContext,
    Valid(body): Valid<AccessUpdate>,
) -> Result<Json<User>> {
    tracing::info!(caller = %ctx.user.id, target = %id, "access change requested");
    let user = state.users.update_access(&id, body).await?;

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::fixtures::{body, login, make_request, register, state};
    use crate::permissions::{self, Role};
    use crate::*;

    #[tokio::test]
    async fn test_teacher_scenario() {
        let state = state();

        let response = make_request(
            None,
            app(state.clone()),
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
        let created = body(response).await;
        assert_eq!(
            created["permissions"],
            json!(["view_teachers", "view_lessons", "edit_lessons"])
        );

        let response = make_request(
            None,
            app(state.clone()),
            Method::POST,
            "/auth/login",
            json!({"email": "a@b.com", "password": "password123"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let logged = body(response).await;
        let token = logged["accessToken"].as_str().unwrap();
        assert_eq!(
            state.token.decode_access(token).unwrap().sub,
            created["id"].as_str().unwrap()
        );

        // Requires `manage_roles`.
        let response = make_request(
            Some(token),
            app(state.clone()),
            Method::PUT,
            &format!("/auth/users/{}/access", created["id"].as_str().unwrap()),
            json!({"role": "SuperAdmin"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_users() {
        let state = state();
        let admin = register(&state, "admin@b.com", Role::Admin).await;
        let teacher = register(&state, "t@b.com", Role::Teacher).await;

        let response = make_request(
            Some(&login(&state, &teacher).await),
            app(state.clone()),
            Method::GET,
            "/auth/users",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            Some(&login(&state, &admin).await),
            app(state.clone()),
            Method::GET,
            "/auth/users",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let users = body(response).await;
        let users = users.as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|u| u.get("passwordHash").is_none()));
    }

    #[tokio::test]
    async fn test_update_access() {
        let state = state();
        let root = register(&state, "root@b.com", Role::SuperAdmin).await;
        let admin = register(&state, "admin@b.com", Role::Admin).await;
        let teacher = register(&state, "t@b.com", Role::Teacher).await;
        let path = format!("/auth/users/{}/access", teacher.id);

        // Admin role, but no `manage_roles` by default.
        let response = make_request(
            Some(&login(&state, &admin).await),
            app(state.clone()),
            Method::PUT,
            &path,
            json!({"role": "HeadTeacher"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let root_token = login(&state, &root).await;
        let response = make_request(
            Some(&root_token),
            app(state.clone()),
            Method::PUT,
            &path,
            json!({"role": "HeadTeacher", "status": "Inactive"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let updated = body(response).await;
        assert_eq!(updated["role"], "HeadTeacher");
        assert_eq!(updated["status"], "Inactive");
        assert_eq!(
            updated["permissions"],
            serde_json::to_value(permissions::default_permissions(Role::HeadTeacher)).unwrap()
        );

        let response = make_request(
            Some(&root_token),
            app(state.clone()),
            Method::PUT,
            "/auth/users/unknown/access",
            json!({"status": "Active"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
