//! Test fixtures shared by unit and integration tests
//!
//! A software authenticator that produces real, verifiable `WebAuthn`
//! responses (ES256 via `ring`), plus a recording mailer and settings
//! builder for exercising the orchestrator without a network.

use std::sync::Mutex;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::value::Value;
use rand::RngCore;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair};
use serde_json::json;

use crate::mailer::Mailer;
use crate::models::Account;
use crate::settings::GatehouseSettings;
use crate::webauthn::{
    AssertionPayload, AssertionResponse, AttestationPayload, RegistrationResponse,
};

/// Settings suitable for tests: fixed secret, localhost relying party
#[must_use]
pub fn build_settings() -> GatehouseSettings {
    let mut settings = GatehouseSettings::default();
    settings.session.session_secret = "test-session-secret-0123456789abcdef".to_string();
    settings.session.cookie_secure = false;
    settings
}

/// A software authenticator holding one ES256 credential
pub struct TestAuthenticator {
    pkcs8: Vec<u8>,
    credential_id: Vec<u8>,
}

impl Default for TestAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthenticator {
    /// Generate a fresh P-256 keypair and random credential id
    ///
    /// # Panics
    /// Panics when the system random source fails (test-only code).
    #[must_use]
    pub fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
                .expect("generate test keypair");
        let mut credential_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut credential_id);
        Self {
            pkcs8: pkcs8.as_ref().to_vec(),
            credential_id,
        }
    }

    fn key_pair(&self) -> EcdsaKeyPair {
        EcdsaKeyPair::from_pkcs8(
            &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            &self.pkcs8,
            &SystemRandom::new(),
        )
        .expect("reload test keypair")
    }

    /// Base64url credential id as stored and exchanged on the wire
    #[must_use]
    pub fn credential_id_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential_id)
    }

    /// COSE-encoded ES256 public key for this credential
    ///
    /// # Panics
    /// Panics when CBOR serialization fails (test-only code).
    #[must_use]
    pub fn cose_public_key(&self) -> Vec<u8> {
        let sec1 = self.key_pair().public_key().as_ref().to_vec();
        assert_eq!(sec1.len(), 65, "expected uncompressed SEC1 point");
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())), // kty: EC2
            (Value::Integer(3.into()), Value::Integer((-7).into())), // alg: ES256
            (Value::Integer((-1).into()), Value::Integer(1.into())), // crv: P-256
            (Value::Integer((-2).into()), Value::Bytes(sec1[1..33].to_vec())),
            (Value::Integer((-3).into()), Value::Bytes(sec1[33..65].to_vec())),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).expect("serialize COSE key");
        out
    }

    fn client_data(ceremony_type: &str, challenge: &str, origin: &str) -> String {
        let client_data = json!({
            "type": ceremony_type,
            "challenge": challenge,
            "origin": origin,
        });
        URL_SAFE_NO_PAD.encode(client_data.to_string())
    }

    /// Produce a registration response for the given challenge
    ///
    /// # Panics
    /// Panics when CBOR serialization fails (test-only code).
    #[must_use]
    pub fn registration_response(
        &self,
        challenge: &str,
        origin: &str,
        sign_count: u32,
    ) -> RegistrationResponse {
        let rp_id_hash = digest::digest(&digest::SHA256, b"localhost");

        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(rp_id_hash.as_ref());
        auth_data.push(0x41); // user present + attested credential data
        auth_data.extend_from_slice(&sign_count.to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]); // AAGUID
        auth_data.extend_from_slice(
            &u16::try_from(self.credential_id.len())
                .expect("credential id length")
                .to_be_bytes(),
        );
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.cose_public_key());

        let attestation = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (Value::Text("attStmt".into()), Value::Map(vec![])),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_bytes = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_bytes)
            .expect("serialize attestation");

        RegistrationResponse {
            id: self.credential_id_b64(),
            raw_id: self.credential_id_b64(),
            response: AttestationPayload {
                client_data_json: Self::client_data("webauthn.create", challenge, origin),
                attestation_object: URL_SAFE_NO_PAD.encode(attestation_bytes),
                transports: Some(vec!["internal".to_string()]),
            },
            r#type: "public-key".to_string(),
            authenticator_attachment: Some("platform".to_string()),
        }
    }

    /// Produce a signed assertion response for the given challenge
    ///
    /// # Panics
    /// Panics when signing fails (test-only code).
    #[must_use]
    pub fn assertion_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        sign_count: u32,
    ) -> AssertionResponse {
        let rp_id_hash = digest::digest(&digest::SHA256, rp_id.as_bytes());

        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(rp_id_hash.as_ref());
        auth_data.push(0x01); // user present
        auth_data.extend_from_slice(&sign_count.to_be_bytes());

        let client_data_json = Self::client_data("webauthn.get", challenge, origin);
        let client_data_bytes = URL_SAFE_NO_PAD
            .decode(&client_data_json)
            .expect("decode test client data");
        let client_data_hash = digest::digest(&digest::SHA256, &client_data_bytes);

        let mut signed_data = auth_data.clone();
        signed_data.extend_from_slice(client_data_hash.as_ref());

        let signature = self
            .key_pair()
            .sign(&SystemRandom::new(), &signed_data)
            .expect("sign test assertion");

        AssertionResponse {
            id: self.credential_id_b64(),
            raw_id: self.credential_id_b64(),
            response: AssertionPayload {
                client_data_json,
                authenticator_data: URL_SAFE_NO_PAD.encode(auth_data),
                signature: URL_SAFE_NO_PAD.encode(signature.as_ref()),
                user_handle: None,
            },
            r#type: "public-key".to_string(),
            authenticator_attachment: Some("platform".to_string()),
        }
    }
}

/// A recorded outbound mail
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMail {
    pub kind: MailKind,
    pub email: String,
    /// The code or link that was delivered
    pub payload: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailKind {
    ConfirmationLink,
    PasswordResetLink,
    VerificationCode,
    TwoFactorCode,
}

/// Mailer that captures deliveries for assertions
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All deliveries so far, oldest first
    ///
    /// # Panics
    /// Panics when the internal lock is poisoned (test-only code).
    #[must_use]
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("recording mailer poisoned").clone()
    }

    /// Most recent delivery of the given kind
    #[must_use]
    pub fn last_of(&self, kind: MailKind) -> Option<SentMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.kind == kind)
    }

    fn record(&self, kind: MailKind, email: &str, payload: &str) {
        self.sent
            .lock()
            .expect("recording mailer poisoned")
            .push(SentMail {
                kind,
                email: email.to_string(),
                payload: payload.to_string(),
            });
    }
}

impl Mailer for RecordingMailer {
    fn send_confirmation_link(&self, _account: &Account, email: &str, link: &str) -> Result<()> {
        self.record(MailKind::ConfirmationLink, email, link);
        Ok(())
    }

    fn send_password_reset_link(&self, _account: &Account, email: &str, link: &str) -> Result<()> {
        self.record(MailKind::PasswordResetLink, email, link);
        Ok(())
    }

    fn send_verification_code(&self, _account: &Account, email: &str, code: &str) -> Result<()> {
        self.record(MailKind::VerificationCode, email, code);
        Ok(())
    }

    fn send_two_factor_code(&self, _account: &Account, email: &str, code: &str) -> Result<()> {
        self.record(MailKind::TwoFactorCode, email, code);
        Ok(())
    }
}
