//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use civic_shared::session::SessionCodec;
use civic_store::{Database, StoreError};

use crate::auth::AuthService;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::delivery::OtpSender;
use crate::gateway::Gateway;
use crate::rate_limit::{PhoneLimiter, Quota, RateLimiter};
use crate::rooms::RoomHub;
use crate::sessions::SessionVerifier;

/// The single database handle, shared across tasks.
///
/// rusqlite is synchronous, so every query runs on tokio's blocking pool
/// instead of an executor thread. The mutex serializes access to the one
/// connection.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database off the async executor.
    pub async fn call<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Database) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let db = inner.blocking_lock();
            f(&db)
        })
        .await
        .map_err(|e| E::from(StoreError::Worker(e.to_string())))?
    }

    /// Direct access for test fixtures.
    #[cfg(test)]
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Database> {
        self.inner.lock().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Store,
    pub auth: Arc<AuthService>,
    pub sessions: SessionVerifier,
    pub chat: ChatService,
    pub gateway: Gateway,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig, sender: Arc<dyn OtpSender>) -> Self {
        let store = Store::new(db);
        let codec = SessionCodec::new(config.jwt_secret.as_bytes(), config.jwt_issuer.clone());

        let auth = Arc::new(AuthService::new(
            store.clone(),
            codec.clone(),
            sender,
            PhoneLimiter::new(Quota::per_period(
                config.otp_phone_limit,
                Duration::from_secs(config.otp_phone_window_secs),
            )),
            config.expose_otp,
        ));
        let sessions = SessionVerifier::new(codec, store.clone());
        let chat = ChatService::new(store.clone());
        let gateway = Gateway::new(
            sessions.clone(),
            chat.clone(),
            RoomHub::new(),
            config.history_page_size,
        );
        let rate_limiter = RateLimiter::new(Quota::new(
            config.rate_limit_burst,
            config.rate_limit_per_sec,
        ));

        Self {
            db: store,
            auth,
            sessions,
            chat,
            gateway,
            rate_limiter,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
