//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use civic_shared::constants::{DEFAULT_HISTORY_PAGE, DEFAULT_ISSUER, MAX_HISTORY_PAGE};

const DEV_JWT_SECRET: &str = "civic-dev-secret-change-me";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./civic.db`
    pub database_path: PathBuf,

    /// HMAC secret used to sign session tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development secret (warned about at startup).
    pub jwt_secret: String,

    /// `iss` claim written into and required from session tokens.
    /// Env: `JWT_ISSUER`
    pub jwt_issuer: String,

    /// Whether `/auth/send-otp` echoes the code in its response body.
    /// Env: `EXPOSE_OTP` (true/false)
    /// Default: `true` in debug builds, `false` in release builds.
    pub expose_otp: bool,

    /// Domain attribute for the session cookie and for logout clearing.
    /// Env: `COOKIE_DOMAIN`
    /// Default: none (host-only cookie).
    pub cookie_domain: Option<String>,

    /// Whether the session cookie carries the `Secure` attribute.
    /// Env: `COOKIE_SECURE` (true/false)
    /// Default: `true`
    pub cookie_secure: bool,

    /// Messages replayed on room join, and default page size for history.
    /// Env: `HISTORY_PAGE_SIZE`
    /// Default: `50`, capped at `200`.
    pub history_page_size: u32,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Sustained per-IP request rate.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Per-IP burst capacity.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Codes a single phone number may be sent per window.
    /// Env: `OTP_PHONE_LIMIT`
    /// Default: `5`
    pub otp_phone_limit: u32,

    /// Length of that window in seconds.
    /// Env: `OTP_PHONE_WINDOW_SECS`
    /// Default: `900`
    pub otp_phone_window_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[redacted]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("expose_otp", &self.expose_otp)
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_secure", &self.cookie_secure)
            .field("history_page_size", &self.history_page_size)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[redacted]"))
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("otp_phone_limit", &self.otp_phone_limit)
            .field("otp_phone_window_secs", &self.otp_phone_window_secs)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], civic_shared::constants::DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./civic.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_issuer: DEFAULT_ISSUER.to_string(),
            expose_otp: cfg!(debug_assertions),
            cookie_domain: None,
            cookie_secure: true,
            history_page_size: DEFAULT_HISTORY_PAGE,
            admin_token: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            otp_phone_limit: 5,
            otp_phone_window_secs: 15 * 60,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            config.jwt_secret = secret;
        }

        if let Some(issuer) = lookup("JWT_ISSUER") {
            if !issuer.is_empty() {
                config.jwt_issuer = issuer;
            }
        }

        if let Some(val) = lookup("EXPOSE_OTP") {
            config.expose_otp = parse_flag(&val);
        }

        if let Some(domain) = lookup("COOKIE_DOMAIN") {
            if !domain.is_empty() {
                config.cookie_domain = Some(domain);
            }
        }

        if let Some(val) = lookup("COOKIE_SECURE") {
            config.cookie_secure = parse_flag(&val);
        }

        if let Some(val) = lookup("HISTORY_PAGE_SIZE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.history_page_size = n.min(MAX_HISTORY_PAGE),
                _ => tracing::warn!(value = %val, "Invalid HISTORY_PAGE_SIZE, using default"),
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_per_sec = n;
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            if let Ok(n) = val.parse::<f64>() {
                config.rate_limit_burst = n;
            }
        }

        if let Some(val) = lookup("OTP_PHONE_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.otp_phone_limit = n,
                _ => tracing::warn!(value = %val, "Invalid OTP_PHONE_LIMIT, using default"),
            }
        }

        if let Some(val) = lookup("OTP_PHONE_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.otp_phone_window_secs = n,
                _ => tracing::warn!(value = %val, "Invalid OTP_PHONE_WINDOW_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}
