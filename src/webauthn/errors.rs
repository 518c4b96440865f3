//! Ceremony error types
//!
//! Every way a registration or assertion ceremony can fail, as a typed
//! enum. Handlers collapse all of these into one generic
//! authentication-failed response; the specific kind is only logged.

use std::fmt;

/// Ceremony verification failures
#[derive(Debug, PartialEq, Eq)]
pub enum CeremonyError {
    /// Challenge state was missing from the store or past its TTL
    ChallengeExpired,

    /// Client data carried a different challenge than the stored state
    ChallengeMismatch,

    /// Client data carried an unexpected origin
    OriginMismatch,

    /// Assertion or attestation signature did not verify
    SignatureInvalid,

    /// No registered credential matches the presented id
    UnknownCredential,

    /// Reported signature counter did not advance (possible clone)
    CounterRegression,

    /// Credential id is already registered
    DuplicateCredential,

    /// Data encoding/parsing error (base64, CBOR, JSON, authData layout)
    Encoding(String),

    /// Key type or algorithm this engine does not support
    NotSupported(String),

    /// Configuration error (e.g., invalid relying party settings)
    Configuration(String),
}

impl CeremonyError {
    /// Stable kind label for internal logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CeremonyError::ChallengeExpired => "challenge_expired",
            CeremonyError::ChallengeMismatch => "challenge_mismatch",
            CeremonyError::OriginMismatch => "origin_mismatch",
            CeremonyError::SignatureInvalid => "signature_invalid",
            CeremonyError::UnknownCredential => "unknown_credential",
            CeremonyError::CounterRegression => "counter_regression",
            CeremonyError::DuplicateCredential => "duplicate_credential",
            CeremonyError::Encoding(_) => "encoding_error",
            CeremonyError::NotSupported(_) => "not_supported",
            CeremonyError::Configuration(_) => "configuration_error",
        }
    }
}

impl fmt::Display for CeremonyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CeremonyError::ChallengeExpired => write!(f, "challenge expired"),
            CeremonyError::ChallengeMismatch => write!(f, "challenge mismatch"),
            CeremonyError::OriginMismatch => write!(f, "origin mismatch"),
            CeremonyError::SignatureInvalid => write!(f, "signature verification failed"),
            CeremonyError::UnknownCredential => write!(f, "unknown credential"),
            CeremonyError::CounterRegression => write!(f, "signature counter regression"),
            CeremonyError::DuplicateCredential => write!(f, "credential already registered"),
            CeremonyError::Encoding(msg) => write!(f, "encoding error: {msg}"),
            CeremonyError::NotSupported(msg) => write!(f, "not supported: {msg}"),
            CeremonyError::Configuration(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for CeremonyError {}
