//! Credential owner with single-flight refresh.
//!
//! At most one refresh runs at a time. Callers that need a token while a
//! refresh is in flight are queued and resolved in arrival order once it
//! finishes; each queued caller gives up on its own after `queue_timeout`.
//! The refresh runs as a spawned task, so it completes even if the caller that
//! started it goes away.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use weir_core::cache::{self, CachePriority, CacheService, SetOptions};
use weir_core::clock::{Clock, SystemClock};
use weir_core::config::AuthConfig;
use weir_core::error::{ApiError, ErrorCategory};
use weir_core::events::{Event, EventBus, Subscription};
use weir_core::transport::{HttpRequest, HttpTransport};

use crate::error::AuthError;
use crate::refresh;
use crate::token::AuthToken;

const AUTH_CACHE_TAG: &str = "auth";
const RETRY_STEP: Duration = Duration::from_millis(1000);

type SharedRefresh = Shared<BoxFuture<'static, Result<AuthToken, AuthError>>>;

#[derive(Debug, Clone)]
pub enum AuthEvent {
    TokenUpdated { expires_at: DateTime<Utc> },
    TokenInvalidated,
    TokenRefreshSuccess { expires_at: DateTime<Utc> },
    TokenRefreshFailed { error: AuthError },
    /// A refresh triggered by [`AuthManager::retry_with_new_auth`] failed.
    RefreshFailed { error: AuthError, attempt: u32 },
    TokenRestored { expires_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    TokenUpdated,
    TokenInvalidated,
    TokenRefreshSuccess,
    TokenRefreshFailed,
    RefreshFailed,
    TokenRestored,
}

impl Event for AuthEvent {
    type Kind = AuthEventKind;

    fn kind(&self) -> AuthEventKind {
        match self {
            Self::TokenUpdated { .. } => AuthEventKind::TokenUpdated,
            Self::TokenInvalidated => AuthEventKind::TokenInvalidated,
            Self::TokenRefreshSuccess { .. } => AuthEventKind::TokenRefreshSuccess,
            Self::TokenRefreshFailed { .. } => AuthEventKind::TokenRefreshFailed,
            Self::RefreshFailed { .. } => AuthEventKind::RefreshFailed,
            Self::TokenRestored { .. } => AuthEventKind::TokenRestored,
        }
    }
}

/// How to react to an authentication-related API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthErrorStrategy {
    pub retryable: bool,
    pub should_refresh_token: bool,
    pub redirect_to_login: bool,
}

struct QueuedRequest {
    id: u64,
    sender: oneshot::Sender<Result<String, AuthError>>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct AuthState {
    token: Option<AuthToken>,
    refresh: Option<SharedRefresh>,
    queue: VecDeque<QueuedRequest>,
    next_request_id: u64,
    /// Bumped whenever the token is replaced or dropped from outside a
    /// refresh. A refresh that started under an older epoch must not install
    /// its result.
    epoch: u64,
}

enum NextStep {
    Queued(u64, oneshot::Receiver<Result<String, AuthError>>),
    Lead(SharedRefresh),
}

struct Inner {
    config: AuthConfig,
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn CacheService>,
    clock: Arc<dyn Clock>,
    state: Mutex<AuthState>,
    events: EventBus<AuthEvent>,
}

#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AuthManager")
            .field("has_token", &state.token.is_some())
            .field("refreshing", &state.refresh.is_some())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl AuthManager {
    pub fn new(
        config: AuthConfig,
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn CacheService>,
    ) -> Self {
        Self::with_clock(config, transport, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AuthConfig,
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn CacheService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                cache,
                clock,
                state: Mutex::new(AuthState::default()),
                events: EventBus::new(),
            }),
        }
    }

    /// Load the persisted token, keeping it only if it has not expired.
    ///
    /// Call once after construction, after subscribing to events.
    pub async fn restore(&self) -> bool {
        let key = &self.inner.config.storage_key;
        let Some(token) = cache::get_json::<AuthToken>(self.inner.cache.as_ref(), key).await else {
            return false;
        };

        if token.is_expired_at(self.inner.clock.now()) {
            tracing::info!("Discarding expired persisted token");
            if let Err(e) = self.inner.cache.delete(key).await {
                tracing::warn!("Failed to delete expired token: {}", e);
            }
            return false;
        }

        let expires_at = token.expires_at;
        {
            let mut state = self.inner.state.lock();
            // A token set since construction wins.
            if state.token.is_some() {
                return false;
            }
            state.token = Some(token);
        }
        tracing::info!("Restored persisted token, expires at {}", expires_at);
        self.inner.events.emit(&AuthEvent::TokenRestored { expires_at });
        true
    }

    pub fn subscribe<F>(&self, kind: AuthEventKind, handler: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, handler)
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.inner.state.lock().token.clone()
    }

    pub fn has_token(&self) -> bool {
        self.inner.state.lock().token.is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().refresh.is_some()
    }

    /// Callers currently waiting on an in-flight refresh.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// The access token to use right now, refreshing first if it is close to
    /// expiry. `None` when signed out or when refresh fails.
    pub async fn current_token(&self) -> Option<String> {
        let now = self.inner.clock.now();
        let buffer = self.inner.config.refresh_buffer();
        {
            let state = self.inner.state.lock();
            let token = state.token.as_ref()?;
            if !token.needs_refresh_at(now, buffer) {
                return Some(token.access_token.clone());
            }
            if !self.inner.config.enable_auto_refresh {
                return (!token.is_expired_at(now)).then(|| token.access_token.clone());
            }
        }

        match self.get_or_refresh_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!("Failed to get access token: {}", e);
                None
            }
        }
    }

    /// The access token if it is not close to expiry, otherwise a refreshed
    /// one, joining or queueing behind a refresh already in flight.
    ///
    /// # Errors
    /// Fails when the refresh fails or the queue wait times out.
    pub async fn get_or_refresh_token(&self) -> Result<String, AuthError> {
        let now = self.inner.clock.now();
        let buffer = self.inner.config.refresh_buffer();
        let fresh = {
            let state = self.inner.state.lock();
            state
                .token
                .as_ref()
                .filter(|token| !token.needs_refresh_at(now, buffer))
                .map(|token| token.access_token.clone())
        };
        if let Some(access_token) = fresh {
            return Ok(access_token);
        }

        if !self.inner.config.enable_request_queue {
            let token = Inner::perform_refresh(Arc::clone(&self.inner)).await?;
            return Ok(token.access_token);
        }

        let next = {
            let mut state = self.inner.state.lock();
            // A refresh may have finished since the check above.
            let now = self.inner.clock.now();
            if let Some(token) = state
                .token
                .as_ref()
                .filter(|token| !token.needs_refresh_at(now, buffer))
            {
                return Ok(token.access_token.clone());
            }

            if state.refresh.is_some() {
                let id = state.next_request_id;
                state.next_request_id += 1;
                let (sender, receiver) = oneshot::channel();
                state.queue.push_back(QueuedRequest {
                    id,
                    sender,
                    enqueued_at: Instant::now(),
                });
                NextStep::Queued(id, receiver)
            } else {
                let refresh = Inner::spawn_refresh(&self.inner);
                state.refresh = Some(refresh.clone());
                NextStep::Lead(refresh)
            }
        };

        match next {
            NextStep::Queued(id, receiver) => self.wait_in_queue(id, receiver).await,
            NextStep::Lead(refresh) => refresh.await.map(|token| token.access_token),
        }
    }

    /// Refresh the token now, or join the refresh already in flight.
    ///
    /// # Errors
    /// Fails when there is no refresh token or the refresh call fails.
    pub async fn refresh_token(&self) -> Result<AuthToken, AuthError> {
        let refresh = {
            let mut state = self.inner.state.lock();
            match &state.refresh {
                Some(refresh) => refresh.clone(),
                None => {
                    let refresh = Inner::spawn_refresh(&self.inner);
                    state.refresh = Some(refresh.clone());
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Replace the current token, for example after an interactive sign-in.
    pub async fn set_token(&self, token: AuthToken) {
        let expires_at = token.expires_at;
        {
            let mut state = self.inner.state.lock();
            state.token = Some(token.clone());
            state.epoch += 1;
        }
        self.inner.persist(&token).await;
        self.inner.events.emit(&AuthEvent::TokenUpdated { expires_at });
    }

    /// Drop the current token and reject anyone waiting for a refresh.
    ///
    /// A refresh still in flight is discarded when it completes.
    pub async fn logout(&self) {
        let queued = {
            let mut state = self.inner.state.lock();
            state.token = None;
            state.epoch += 1;
            std::mem::take(&mut state.queue)
        };
        for request in queued {
            let _ = request.sender.send(Err(AuthError::RefreshAborted));
        }
        self.inner.forget().await;
        self.inner.events.emit(&AuthEvent::TokenInvalidated);
    }

    /// Add an `Authorization` header when a token is available.
    pub async fn authorize(&self, request: &mut HttpRequest) -> bool {
        let Some(access_token) = self.current_token().await else {
            return false;
        };
        let token_type = self
            .token()
            .map_or_else(|| "Bearer".to_string(), |token| token.token_type);
        request.set_header("Authorization", format!("{} {}", token_type, access_token));
        true
    }

    /// Decide how to react to `error`.
    ///
    /// A 401 is worth a refresh only while a token exists and auto-refresh is
    /// on; otherwise the user has to sign in again. A 403 is a permission
    /// problem that a new token will not fix.
    pub fn handle_auth_error(&self, error: &ApiError) -> AuthErrorStrategy {
        match error.status_code {
            Some(401) => {
                if self.has_token() && self.inner.config.enable_auto_refresh {
                    AuthErrorStrategy {
                        retryable: true,
                        should_refresh_token: true,
                        redirect_to_login: false,
                    }
                } else {
                    AuthErrorStrategy {
                        retryable: false,
                        should_refresh_token: false,
                        redirect_to_login: true,
                    }
                }
            }
            Some(403) => AuthErrorStrategy {
                retryable: false,
                should_refresh_token: false,
                redirect_to_login: false,
            },
            _ if error.category() == ErrorCategory::Authentication => AuthErrorStrategy {
                retryable: true,
                should_refresh_token: true,
                redirect_to_login: false,
            },
            _ => AuthErrorStrategy {
                retryable: false,
                should_refresh_token: false,
                redirect_to_login: false,
            },
        }
    }

    /// Run `operation`, refreshing the token and retrying on authentication
    /// failures. Waits `1s * attempt` before each retry and gives up after
    /// `max_retry_attempts` attempts.
    ///
    /// # Errors
    /// Returns the operation's last error.
    pub async fn retry_with_new_auth<T, F, Fut>(&self, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.inner.config.max_retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempt += 1;

            let strategy = self.handle_auth_error(&error);
            if !strategy.retryable || strategy.redirect_to_login || attempt >= max_attempts {
                return Err(error);
            }

            if strategy.should_refresh_token {
                if let Err(refresh_error) = self.refresh_token().await {
                    tracing::warn!("Refresh during auth retry failed: {}", refresh_error);
                    self.inner.events.emit(&AuthEvent::RefreshFailed {
                        error: refresh_error,
                        attempt,
                    });
                    return Err(error);
                }
            }

            let delay = RETRY_STEP * attempt;
            tracing::debug!("Retrying with new credentials in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;
        }
    }

    async fn wait_in_queue(
        &self,
        id: u64,
        receiver: oneshot::Receiver<Result<String, AuthError>>,
    ) -> Result<String, AuthError> {
        let timeout = self.inner.config.queue_timeout();
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthError::RefreshAborted),
            Err(_) => {
                self.inner.state.lock().queue.retain(|request| request.id != id);
                tracing::warn!("Queued token request timed out after {:?}", timeout);
                Err(AuthError::QueueTimeout(timeout))
            }
        }
    }
}

impl Inner {
    fn spawn_refresh(inner: &Arc<Inner>) -> SharedRefresh {
        let task = tokio::spawn(Inner::perform_refresh(Arc::clone(inner)));
        task.map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!("Token refresh task failed: {}", e);
                Err(AuthError::RefreshAborted)
            })
        })
        .boxed()
        .shared()
    }

    async fn perform_refresh(inner: Arc<Inner>) -> Result<AuthToken, AuthError> {
        let (refresh_token, epoch) = {
            let state = inner.state.lock();
            let refresh_token = state
                .token
                .as_ref()
                .and_then(|token| token.refresh_token.clone());
            (refresh_token, state.epoch)
        };

        let result = match refresh_token {
            Some(refresh_token) => refresh::request_refresh(
                inner.transport.as_ref(),
                &inner.config.refresh_token_url,
                &refresh_token,
                inner.clock.now(),
            )
            .await
            .map_err(AuthError::RefreshFailed),
            None => Err(AuthError::NoRefreshToken),
        };

        let (queued, superseded) = {
            let mut state = inner.state.lock();
            state.refresh = None;
            let superseded = state.epoch != epoch;
            if !superseded {
                state.token = result.as_ref().ok().cloned();
            }
            (std::mem::take(&mut state.queue), superseded)
        };

        if superseded {
            tracing::info!(
                "Token changed during refresh, discarding result and rejecting {} queued requests",
                queued.len()
            );
            for request in queued {
                let _ = request.sender.send(Err(AuthError::RefreshAborted));
            }
            return Err(AuthError::RefreshAborted);
        }

        match result {
            Ok(token) => {
                inner.persist(&token).await;

                tracing::info!(
                    "Token refreshed, expires at {}, resolving {} queued requests",
                    token.expires_at,
                    queued.len()
                );
                for request in queued {
                    tracing::trace!(
                        "Resolving queued request {} after {:?}",
                        request.id,
                        request.enqueued_at.elapsed()
                    );
                    let _ = request.sender.send(Ok(token.access_token.clone()));
                }

                let expires_at = token.expires_at;
                inner.events.emit(&AuthEvent::TokenUpdated { expires_at });
                inner.events.emit(&AuthEvent::TokenRefreshSuccess { expires_at });
                Ok(token)
            }
            Err(error) => {
                inner.forget().await;

                tracing::error!(
                    "Token refresh failed, rejecting {} queued requests: {}",
                    queued.len(),
                    error
                );
                for request in queued {
                    let _ = request.sender.send(Err(error.clone()));
                }

                inner.events.emit(&AuthEvent::TokenInvalidated);
                inner.events.emit(&AuthEvent::TokenRefreshFailed {
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn persist(&self, token: &AuthToken) {
        let ttl = token.time_until_expiry(self.clock.now());
        if ttl.is_zero() {
            tracing::debug!("Not persisting an expired token");
            return;
        }
        let options = SetOptions::with_ttl(ttl)
            .tag(AUTH_CACHE_TAG)
            .persistent()
            .priority(CachePriority::High);
        if let Err(e) =
            cache::set_json(self.cache.as_ref(), &self.config.storage_key, token, options).await
        {
            tracing::warn!("Failed to persist token: {}", e);
        }
    }

    async fn forget(&self) {
        if let Err(e) = self.cache.delete(&self.config.storage_key).await {
            tracing::warn!("Failed to delete persisted token: {}", e);
        }
    }
}
