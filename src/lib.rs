//! Session authentication and role-based authorization for the campus
//! administration API.

#![forbid(unsafe_code)]
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod middleware;
pub mod permissions;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::config::Configuration;
use crate::crypto::PasswordManager;
use crate::session::SessionService;
use crate::token::TokenManager;
use crate::user::{MemoryUserRepository, PgUserRepository, UserRepository, UserService};

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub repo: Arc<dyn UserRepository>,
    pub token: Arc<TokenManager>,
    pub users: UserService,
    pub sessions: SessionService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire services around `repo`.
    pub fn new(
        config: Arc<Configuration>,
        repo: Arc<dyn UserRepository>,
        crypto: PasswordManager,
    ) -> Self {
        let token = Arc::new(TokenManager::new(&config.token));

        Self {
            users: UserService::new(Arc::clone(&repo), crypto.clone()),
            sessions: SessionService::new(Arc::clone(&repo), crypto, Arc::clone(&token)),
            config,
            repo,
            token,
            metrics: None,
        }
    }

    /// Expose `handle` on `GET /metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::render))
        .nest("/auth", router::router(&state))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    config.token.check()?;
    let crypto = PasswordManager::new(&config.password)?;

    let repo: Arc<dyn UserRepository> = match &config.postgres {
        Some(postgres) => {
            let repo = PgUserRepository::connect(postgres).await?;
            // execute migrations scripts on start.
            repo.migrate().await?;
            Arc::new(repo)
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, users are kept in memory"
            );
            Arc::new(MemoryUserRepository::new())
        },
    };

    Ok(AppState::new(config, repo, crypto))
}

/// Shared test helpers.
///
/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) mod fixtures {
    use axum::Router;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{Method, header};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    use super::*;
    use crate::config::Environment;
    use crate::permissions::Role;
    use crate::user::{Registration, User};

    pub fn crypto() -> PasswordManager {
        PasswordManager::new(&config::Password {
            cost: 4,
            ..Default::default()
        })
        .unwrap()
    }

    pub fn registration(email: &str, role: Role) -> Registration {
        Registration {
            email: email.into(),
            password: "password123".into(),
            full_name: "A B".into(),
            role,
            phone_number: None,
            subject: None,
            status: None,
            permissions: None,
        }
    }

    /// In-memory state with fast hashing.
    pub fn state() -> AppState {
        let config = Configuration {
            environment: Environment::Test,
            token: crate::token::tests::config(),
            ..Default::default()
        };

        AppState::new(
            Arc::new(config),
            Arc::new(MemoryUserRepository::new()),
            crypto(),
        )
    }

    /// Register a user with password `password123`.
    pub async fn register(state: &AppState, email: &str, role: Role) -> User {
        state.users.register(registration(email, role)).await.unwrap()
    }

    /// Open a session and return its access token.
    pub async fn login(state: &AppState, user: &User) -> String {
        state
            .sessions
            .issue_session_pair(&user.id)
            .await
            .unwrap()
            .access_token
    }

    pub async fn make_request(
        token: Option<&str>,
        app: Router,
        method: Method,
        path: &str,
        body: String,
    ) -> Response {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        app.oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    /// Collect a JSON response body.
    pub async fn body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
