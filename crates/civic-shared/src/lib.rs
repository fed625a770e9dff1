//! # civic-shared
//!
//! Types shared between the store and the server: identifiers and enums,
//! the realtime wire protocol, one-time code helpers and the session token
//! codec.

pub mod constants;
pub mod error;
pub mod otp;
pub mod protocol;
pub mod session;
pub mod types;

pub use error::{ParseError, SessionError};
