//! HTTP access to the authentication API.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::client::ClientError;
use crate::error::{INVALID_TOKEN_TYPE, ResponseError};
use crate::permissions::PermissionTable;
use crate::router::login::Response as LoginResponse;
use crate::router::refresh_token::Response as RefreshResponse;
use crate::user::User;

/// Server operations used by [`SessionManager`](crate::client::SessionManager).
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Open a session. The refresh cookie is kept by the implementation.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;

    /// Exchange the refresh cookie for a new access token.
    async fn refresh(&self) -> Result<String, ClientError>;

    async fn logout(&self, access_token: &str) -> Result<(), ClientError>;

    async fn profile(&self, access_token: &str) -> Result<User, ClientError>;

    async fn permissions(&self) -> Result<PermissionTable, ClientError>;
}

/// [`AuthApi`] over HTTP, with an in-process cookie jar.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: Client,
    base: Url,
}

impl HttpAuthApi {
    /// Create a new [`HttpAuthApi`] targeting `base`, e.g. `https://campus.example/`.
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let client = Client::builder().cookie_store(true).build()?;

        Ok(Self {
            client,
            base: Url::parse(base)?,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    /// `GET` a protected JSON resource.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, ClientError> {
        let response = self
            .client
            .get(self.url(path)?)
            .bearer_auth(access_token)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }
}

/// Turn non-2xx responses into [`ClientError`].
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.json::<ResponseError>().await.ok();
    if status == StatusCode::UNAUTHORIZED {
        let invalid_token = body
            .as_ref()
            .and_then(|body| body.r#type.as_deref())
            .is_some_and(|kind| kind == INVALID_TOKEN_TYPE);
        return Err(ClientError::Unauthorized { invalid_token });
    }

    Err(ClientError::Api {
        status: status.as_u16(),
        detail: body.map(|body| body.detail).unwrap_or_default(),
    })
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/login")?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn refresh(&self) -> Result<String, ClientError> {
        let response = self
            .client
            .post(self.url("/auth/access-token")?)
            .send()
            .await?;

        let body: RefreshResponse = check(response).await?.json().await?;
        Ok(body.access_token)
    }

    async fn logout(&self, access_token: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/auth/logout")?)
            .bearer_auth(access_token)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    async fn profile(&self, access_token: &str) -> Result<User, ClientError> {
        self.get_json("/auth/profile", access_token).await
    }

    async fn permissions(&self) -> Result<PermissionTable, ClientError> {
        let response = self
            .client
            .get(self.url("/auth/permissions")?)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }
}
