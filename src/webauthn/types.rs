//! `WebAuthn` wire and state types
//!
//! Serializable structures for ceremony options sent to the browser,
//! ceremony responses received from it, and the per-ceremony state held
//! server-side. Binary fields travel as base64url without padding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registration options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Milliseconds
    pub attestation: String,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
}

/// Assertion options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptions {
    pub challenge: String,
    pub timeout: u32,
    pub rp_id: String,
    /// Empty for the discoverable-credential flow
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String, // Base64URL-encoded user handle
    pub name: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    pub r#type: String, // Always "public-key"
    pub alg: i32,       // -7 for ES256, -257 for RS256
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>,
    #[serde(rename = "requireResidentKey")]
    pub require_resident_key: bool,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialDescriptor {
    pub r#type: String, // Always "public-key"
    pub id: String,     // Base64URL-encoded credential ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

/// Registration response from the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,
    pub raw_id: String,
    pub response: AttestationPayload,
    pub r#type: String,
    #[serde(default)]
    pub authenticator_attachment: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AttestationPayload {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
    #[serde(default)]
    pub transports: Option<Vec<String>>,
}

/// Assertion response from the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub id: String,
    pub raw_id: String,
    pub response: AssertionPayload,
    pub r#type: String,
    #[serde(default)]
    pub authenticator_attachment: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AssertionPayload {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "userHandle", default)]
    pub user_handle: Option<String>,
}

/// Which ceremony a stored challenge belongs to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Assertion,
}

/// Per-ceremony state, held in the keyed store for the duration of one
/// ceremony and consumed on completion regardless of outcome
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChallengeState {
    pub kind: CeremonyKind,
    pub challenge: String, // Base64URL-encoded challenge
    /// Account the ceremony is bound to, absent for the
    /// discoverable-credential assertion flow
    pub account_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Credential material extracted from a verified attestation
#[derive(Clone, Debug)]
pub struct RegisteredCredential {
    pub credential_id: String, // Base64URL-encoded
    pub public_key: Vec<u8>,   // COSE-encoded
    pub sign_count: u32,
    pub transports: Vec<String>,
}
