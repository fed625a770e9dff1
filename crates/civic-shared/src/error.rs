use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session token missing")]
    Missing,

    #[error("Session token expired")]
    Expired,

    #[error("Session token invalid")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("Failed to sign session token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}
