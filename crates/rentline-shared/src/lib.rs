//! # rentline-shared
//!
//! Types shared by the rentline store and server: identifiers and roles,
//! the realtime hub protocol, and signed access tokens.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;
