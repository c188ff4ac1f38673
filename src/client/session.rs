use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, RwLock};

use crate::client::{AuthApi, ClientError, SessionStorage, StoredSession};
use crate::permissions::{PERMISSIONS_VERSION, PermissionTable};
use crate::user::User;

pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

type PendingRefresh = Shared<BoxFuture<'static, Result<String, Arc<ClientError>>>>;

/// Where the client stands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Boot has not completed yet.
    Unknown,
    LoggedIn(Box<StoredSession>),
    LoggedOut,
}

/// Holds the signed-in user and its access token.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn SessionStorage>,
    state: RwLock<SessionState>,
    pending: Mutex<Option<PendingRefresh>>,
    refresh_timeout: Duration,
}

impl SessionManager {
    /// Create a new [`SessionManager`]. Call [`SessionManager::restore`]
    /// before anything else.
    pub fn new(api: Arc<dyn AuthApi>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            api,
            storage,
            state: RwLock::new(SessionState::Unknown),
            pending: Mutex::new(None),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Bound each refresh call; a timeout counts as a failed refresh.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn user(&self) -> Option<User> {
        match &*self.state.read().await {
            SessionState::LoggedIn(session) => Some(session.user.clone()),
            _ => None,
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        match &*self.state.read().await {
            SessionState::LoggedIn(session) => Some(session.access_token.clone()),
            _ => None,
        }
    }

    /// Boot sequence.
    ///
    /// A cached session is restored without network access. Cached
    /// permissions derived from another table version are re-derived
    /// from the table published by the server, or from the compiled one
    /// when the server cannot be reached. Without a cache, a silent
    /// refresh decides between logged in and logged out.
    pub async fn restore(&self) -> SessionState {
        let cached = self.storage.load().await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "discarding unreadable session cache");
            None
        });

        let state = match cached {
            Some(mut session) => {
                if session.permissions_version != PERMISSIONS_VERSION {
                    tracing::info!(
                        cached = session.permissions_version,
                        current = PERMISSIONS_VERSION,
                        "re-deriving cached permissions"
                    );
                    let table = self.permission_table().await;
                    session.user.permissions = table.for_role(session.user.role);
                    session.permissions_version = table.version;
                    self.persist(&session).await;
                }
                SessionState::LoggedIn(Box::new(session))
            },
            None => self.silent_login().await,
        };

        *self.state.write().await = state.clone();
        state
    }

    async fn permission_table(&self) -> PermissionTable {
        match self.api.permissions().await {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "permission table unavailable, using compiled one");
                PermissionTable::current()
            },
        }
    }

    async fn silent_login(&self) -> SessionState {
        let result = async {
            let access_token = self.refresh_access_token().await?;
            let user = self.api.profile(&access_token).await?;
            Ok::<_, ClientError>(StoredSession {
                user,
                access_token,
                permissions_version: PERMISSIONS_VERSION,
            })
        }
        .await;

        match result {
            Ok(session) => {
                self.persist(&session).await;
                SessionState::LoggedIn(Box::new(session))
            },
            Err(err) => {
                tracing::debug!(error = %err, "no session to restore");
                SessionState::LoggedOut
            },
        }
    }

    /// Log in and cache the session. The refresh cookie stays in the
    /// [`AuthApi`] implementation.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let response = self.api.login(email, password).await?;

        let session = StoredSession {
            user: response.user,
            access_token: response.access_token,
            permissions_version: PERMISSIONS_VERSION,
        };
        self.persist(&session).await;

        let user = session.user.clone();
        *self.state.write().await = SessionState::LoggedIn(Box::new(session));
        Ok(user)
    }

    /// Log out on the server, then forget the local session.
    ///
    /// The server call goes through [`SessionManager::authorized`] so an
    /// expired access token still clears the server-side refresh slot.
    pub async fn logout(&self) {
        let api = Arc::clone(&self.api);
        let result = self
            .authorized(move |token| {
                let api = Arc::clone(&api);
                async move { api.logout(&token).await }
            })
            .await;

        match result {
            Ok(()) | Err(ClientError::LoggedOut) => {},
            Err(err) => tracing::warn!(error = %err, "server logout failed"),
        }
        self.forget().await;
    }

    async fn forget(&self) {
        if let Err(err) = self.storage.clear().await {
            tracing::warn!(error = %err, "cannot clear session cache");
        }
        *self.state.write().await = SessionState::LoggedOut;
    }

    async fn persist(&self, session: &StoredSession) {
        if let Err(err) = self.storage.save(session).await {
            tracing::warn!(error = %err, "cannot cache session");
        }
    }

    /// Get a new access token from the refresh cookie.
    ///
    /// Concurrent callers share one network call.
    pub async fn refresh_access_token(&self) -> Result<String, ClientError> {
        let pending = {
            let mut slot = self.pending.lock().await;
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                },
            }
        };

        let result = pending.clone().await;

        {
            let mut slot = self.pending.lock().await;
            if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
                *slot = None;
            }
        }

        let access_token = result.map_err(ClientError::Refresh)?;
        self.store_access_token(&access_token).await;
        Ok(access_token)
    }

    fn start_refresh(&self) -> PendingRefresh {
        let api = Arc::clone(&self.api);
        let timeout = self.refresh_timeout;

        async move {
            match tokio::time::timeout(timeout, api.refresh()).await {
                Ok(result) => result.map_err(Arc::new),
                Err(_) => Err(Arc::new(ClientError::Timeout)),
            }
        }
        .boxed()
        .shared()
    }

    async fn store_access_token(&self, access_token: &str) {
        let session = {
            let mut state = self.state.write().await;
            match &mut *state {
                SessionState::LoggedIn(session) if session.access_token != access_token => {
                    session.access_token = access_token.to_owned();
                    Some(StoredSession::clone(session))
                },
                _ => None,
            }
        };

        if let Some(session) = session {
            self.persist(&session).await;
        }
    }

    /// Run a protected request with the current access token.
    ///
    /// On a 401 the token is refreshed and the request retried once. When
    /// the refresh fails the session is dropped.
    pub async fn authorized<T, F, Fut>(&self, request: F) -> Result<T, ClientError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let token = self.access_token().await.ok_or(ClientError::LoggedOut)?;

        match request(token).await {
            Err(err) if err.is_unauthorized() => {
                tracing::debug!("access token rejected, refreshing");
            },
            other => return other,
        }

        let token = match self.refresh_access_token().await {
            Ok(token) => token,
            Err(err) => {
                tracing::info!(error = %err, "refresh failed, logging out");
                self.forget().await;
                return Err(err);
            },
        };

        request(token).await
    }

    /// Fetch the current user through [`SessionManager::authorized`].
    pub async fn profile(&self) -> Result<User, ClientError> {
        let api = Arc::clone(&self.api);
        self.authorized(move |token| {
            let api = Arc::clone(&api);
            async move { api.profile(&token).await }
        })
        .await
    }
}
