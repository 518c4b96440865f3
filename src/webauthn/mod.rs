//! `WebAuthn` ceremony implementation
//!
//! Core passkey functionality independent of session management and HTTP
//! plumbing, implementing the W3C `WebAuthn` specification with standard
//! cryptography libraries.

mod cbor;
mod engine;
mod errors;
mod types;

// Re-exports for public use
pub use engine::CeremonyEngine;
pub use errors::CeremonyError;
pub use types::*;
