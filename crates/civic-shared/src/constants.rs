/// Application name
pub const APP_NAME: &str = "Civic";

/// One-time codes are six decimal digits, drawn uniformly from this range
pub const OTP_CODE_MIN: u32 = 100_000;
pub const OTP_CODE_MAX: u32 = 999_999;

/// How long an issued code stays valid (10 minutes)
pub const OTP_TTL_SECS: i64 = 10 * 60;

/// Earliest time a client should ask for a new code (30 seconds)
pub const OTP_RESEND_SECS: i64 = 30;

/// Session token validity (7 days)
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "token";

/// Legacy cookies cleared on logout alongside the session cookie
pub const LEGACY_COOKIES: [&str; 2] = ["refreshToken", "sessionId"];

/// Default JWT issuer
pub const DEFAULT_ISSUER: &str = "civic-server";

/// Messages replayed on room join when nothing else is configured
pub const DEFAULT_HISTORY_PAGE: u32 = 50;

/// Upper bound for any single history page
pub const MAX_HISTORY_PAGE: u32 = 200;

/// Maximum chat message length in bytes (16 KiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Placeholder values for profiles created on first verification
pub const DEFAULT_PHOTO_URL: &str = "https://www.gravatar.com/avatar/?d=mp";
pub const DEFAULT_REGION: &str = "unassigned";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// BLAKE3 key derivation context for stored OTP hashes
pub const KDF_CONTEXT_OTP: &str = "civic-otp-hash-v1";

/// How often an idle realtime connection re-checks its session
pub const SESSION_RECHECK_SECS: u64 = 30;
