//! Ceremony engine
//!
//! Implements the two `WebAuthn` ceremonies (registration and assertion)
//! against the W3C specification using `ring` for signature verification
//! and the CBOR module for attestation parsing. The engine is stateless:
//! callers store the returned [`ChallengeState`] keyed to the requesting
//! session and present it exactly once at completion.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ring::digest;
use ring::signature;
use uuid::Uuid;

use super::cbor::{self, CoseKey, FLAG_USER_PRESENT};
use super::errors::CeremonyError;
use super::types::{
    AssertionOptions, AssertionResponse, AuthenticatorSelectionCriteria, CeremonyKind,
    ChallengeState, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RegisteredCredential, RegistrationOptions, RegistrationResponse, RelyingParty, UserEntity,
};
use crate::models::PasskeyCredential;
use crate::settings::PasskeySettings;
use crate::utils::crypto;

/// Generate a fresh ceremony challenge (32 bytes, base64url)
fn generate_challenge() -> String {
    crypto::generate_nonce(32)
}

pub struct CeremonyEngine {
    settings: PasskeySettings,
}

impl CeremonyEngine {
    /// Create an engine from relying-party settings
    ///
    /// # Errors
    /// Returns `CeremonyError::Configuration` when the relying party id is
    /// empty or the origin is neither https nor localhost.
    pub fn new(settings: PasskeySettings) -> Result<Self, CeremonyError> {
        if settings.rp_id.is_empty() {
            return Err(CeremonyError::Configuration(
                "relying party id cannot be empty".into(),
            ));
        }
        if !settings.rp_origin.starts_with("https://")
            && !settings.rp_origin.starts_with("http://localhost")
        {
            return Err(CeremonyError::Configuration(
                "origin must be https:// except for localhost".into(),
            ));
        }
        Ok(Self { settings })
    }

    fn timeout_millis(&self) -> u32 {
        u32::try_from(self.settings.timeout_seconds * 1000).unwrap_or(60_000)
    }

    /// Ceremony state TTL in seconds, shared with the keyed store
    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> u64 {
        self.settings.timeout_seconds
    }

    /// Start a registration ceremony for an account
    ///
    /// Existing credentials go on the exclusion list so a device cannot
    /// re-register the same credential.
    #[must_use]
    pub fn begin_registration(
        &self,
        account_id: Uuid,
        user_name: &str,
        display_name: &str,
        existing: &[PasskeyCredential],
    ) -> (RegistrationOptions, ChallengeState) {
        let challenge = generate_challenge();

        let options = RegistrationOptions {
            challenge: challenge.clone(),
            rp: RelyingParty {
                id: self.settings.rp_id.clone(),
                name: self.settings.rp_name.clone(),
            },
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(account_id.as_bytes()),
                name: user_name.to_string(),
                display_name: display_name.to_string(),
            },
            pub_key_cred_params: vec![
                // ES256 (ECDSA P-256 with SHA-256)
                PublicKeyCredentialParameters {
                    r#type: "public-key".to_string(),
                    alg: -7,
                },
                // RS256 (RSASSA-PKCS1-v1_5 with SHA-256)
                PublicKeyCredentialParameters {
                    r#type: "public-key".to_string(),
                    alg: -257,
                },
            ],
            timeout: self.timeout_millis(),
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self.settings.authenticator_attachment.clone(),
                require_resident_key: true, // Required for passkeys
                user_verification: self.settings.user_verification.clone(),
            },
            exclude_credentials: existing
                .iter()
                .map(|c| PublicKeyCredentialDescriptor {
                    r#type: "public-key".to_string(),
                    id: c.credential_id.clone(),
                    transports: (!c.transports.is_empty()).then(|| c.transports.clone()),
                })
                .collect(),
        };

        let state = ChallengeState {
            kind: CeremonyKind::Registration,
            challenge,
            account_id: Some(account_id),
            created_at: Utc::now(),
        };

        (options, state)
    }

    /// Complete a registration ceremony
    ///
    /// # Errors
    /// Returns a `CeremonyError` when client data, origin, challenge, or
    /// the attestation object fail verification. The caller must have
    /// consumed the stored state before calling, whatever the outcome.
    pub fn complete_registration(
        &self,
        response: &RegistrationResponse,
        state: &ChallengeState,
    ) -> Result<RegisteredCredential, CeremonyError> {
        if state.kind != CeremonyKind::Registration {
            return Err(CeremonyError::ChallengeMismatch);
        }

        self.verify_client_data(
            &response.response.client_data_json,
            "webauthn.create",
            &state.challenge,
        )?;

        let attested = cbor::parse_attestation_object(&response.response.attestation_object)?;

        // Reject keys this engine could never verify at assertion time
        let _ = cbor::extract_cose_key(&attested.public_key_cose)?;

        let credential_id = URL_SAFE_NO_PAD.encode(&attested.credential_id);
        if response.raw_id != credential_id {
            return Err(CeremonyError::Encoding(
                "credential id does not match attested data".to_string(),
            ));
        }

        Ok(RegisteredCredential {
            credential_id,
            public_key: attested.public_key_cose,
            sign_count: attested.sign_count,
            transports: response.response.transports.clone().unwrap_or_default(),
        })
    }

    /// Start an assertion ceremony
    ///
    /// With a known account the allow list is restricted to its registered
    /// credentials; with none, the list is empty and any discoverable
    /// credential for this relying party may respond.
    #[must_use]
    pub fn begin_assertion(
        &self,
        account_id: Option<Uuid>,
        allowed: &[PasskeyCredential],
    ) -> (AssertionOptions, ChallengeState) {
        let challenge = generate_challenge();

        let options = AssertionOptions {
            challenge: challenge.clone(),
            timeout: self.timeout_millis(),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials: allowed
                .iter()
                .map(|c| PublicKeyCredentialDescriptor {
                    r#type: "public-key".to_string(),
                    id: c.credential_id.clone(),
                    transports: (!c.transports.is_empty()).then(|| c.transports.clone()),
                })
                .collect(),
            user_verification: self.settings.user_verification.clone(),
        };

        let state = ChallengeState {
            kind: CeremonyKind::Assertion,
            challenge,
            account_id,
            created_at: Utc::now(),
        };

        (options, state)
    }

    /// Complete an assertion ceremony against a stored credential
    ///
    /// Verifies client data, relying-party binding, the assertion
    /// signature, and sign-count monotonicity. The reported counter must be
    /// strictly greater than the stored value; a pair of zeros means the
    /// authenticator does not support counters and is accepted.
    ///
    /// # Errors
    /// Returns the specific [`CeremonyError`] kind; callers surface all of
    /// them as a generic authentication failure.
    pub fn complete_assertion(
        &self,
        response: &AssertionResponse,
        state: &ChallengeState,
        stored: &PasskeyCredential,
    ) -> Result<u32, CeremonyError> {
        if state.kind != CeremonyKind::Assertion {
            return Err(CeremonyError::ChallengeMismatch);
        }

        self.verify_client_data(
            &response.response.client_data_json,
            "webauthn.get",
            &state.challenge,
        )?;

        let auth_data = cbor::decode_b64(&response.response.authenticator_data)?;
        let parsed = cbor::parse_assertion_data(&auth_data)?;

        let rp_id_hash = digest::digest(&digest::SHA256, self.settings.rp_id.as_bytes());
        if parsed.rp_id_hash != rp_id_hash.as_ref() {
            return Err(CeremonyError::OriginMismatch);
        }
        if parsed.flags & FLAG_USER_PRESENT == 0 {
            return Err(CeremonyError::SignatureInvalid);
        }

        Self::verify_assertion_signature(response, &auth_data, stored)?;

        // Counter check, after the signature so a forged counter cannot
        // probe stored values
        if parsed.sign_count <= stored.sign_count
            && !(parsed.sign_count == 0 && stored.sign_count == 0)
        {
            return Err(CeremonyError::CounterRegression);
        }

        Ok(parsed.sign_count)
    }

    /// Verify client data JSON: type, challenge, then origin
    fn verify_client_data(
        &self,
        client_data_json_b64: &str,
        expected_type: &str,
        expected_challenge: &str,
    ) -> Result<(), CeremonyError> {
        let client_data_bytes = cbor::decode_b64(client_data_json_b64)?;
        let client_data: serde_json::Value = serde_json::from_slice(&client_data_bytes)
            .map_err(|_| CeremonyError::Encoding("invalid client data JSON".to_string()))?;

        if client_data["type"] != expected_type {
            return Err(CeremonyError::ChallengeMismatch);
        }
        if client_data["challenge"] != expected_challenge {
            return Err(CeremonyError::ChallengeMismatch);
        }
        if client_data["origin"] != self.settings.rp_origin.as_str() {
            return Err(CeremonyError::OriginMismatch);
        }

        Ok(())
    }

    /// Verify the assertion signature over authenticatorData ‖ SHA-256(clientDataJSON)
    fn verify_assertion_signature(
        response: &AssertionResponse,
        auth_data: &[u8],
        stored: &PasskeyCredential,
    ) -> Result<(), CeremonyError> {
        let client_data_bytes = cbor::decode_b64(&response.response.client_data_json)?;
        let client_data_hash = digest::digest(&digest::SHA256, &client_data_bytes);

        let mut signed_data =
            Vec::with_capacity(auth_data.len() + client_data_hash.as_ref().len());
        signed_data.extend_from_slice(auth_data);
        signed_data.extend_from_slice(client_data_hash.as_ref());

        let signature_bytes = cbor::decode_b64(&response.response.signature)?;

        match cbor::extract_cose_key(&stored.public_key)? {
            CoseKey::Es256 { sec1 } => {
                signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &sec1)
                    .verify(&signed_data, &signature_bytes)
                    .map_err(|_| CeremonyError::SignatureInvalid)
            }
            CoseKey::Rs256 { pkcs1_der } => signature::UnparsedPublicKey::new(
                &signature::RSA_PKCS1_2048_8192_SHA256,
                &pkcs1_der,
            )
            .verify(&signed_data, &signature_bytes)
            .map_err(|_| CeremonyError::SignatureInvalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_helpers::TestAuthenticator;

    fn engine() -> CeremonyEngine {
        CeremonyEngine::new(PasskeySettings::default()).unwrap()
    }

    fn stored_credential(authenticator: &TestAuthenticator, sign_count: u32) -> PasskeyCredential {
        PasskeyCredential {
            credential_id: authenticator.credential_id_b64(),
            account_id: Uuid::new_v4(),
            public_key: authenticator.cose_public_key(),
            sign_count,
            transports: vec![],
            name: None,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[test]
    fn rejects_invalid_relying_party_settings() {
        let mut settings = PasskeySettings::default();
        settings.rp_id = String::new();
        assert!(CeremonyEngine::new(settings).is_err());

        let mut settings = PasskeySettings::default();
        settings.rp_origin = "http://insecure.example".to_string();
        assert!(CeremonyEngine::new(settings).is_err());
    }

    #[test]
    fn registration_round_trip() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let account_id = Uuid::new_v4();

        let (options, state) =
            engine.begin_registration(account_id, "a@x.test", "a@x.test", &[]);
        assert_eq!(options.rp.id, "localhost");
        assert!(options.exclude_credentials.is_empty());
        assert_eq!(state.account_id, Some(account_id));

        let response = authenticator.registration_response(
            &state.challenge,
            "http://localhost:8080",
            5,
        );
        let credential = engine.complete_registration(&response, &state).unwrap();
        assert_eq!(credential.credential_id, authenticator.credential_id_b64());
        assert_eq!(credential.sign_count, 5);
        assert_eq!(credential.public_key, authenticator.cose_public_key());
    }

    #[test]
    fn registration_rejects_wrong_challenge() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let (_, state) =
            engine.begin_registration(Uuid::new_v4(), "a@x.test", "a@x.test", &[]);

        let response =
            authenticator.registration_response("different-challenge", "http://localhost:8080", 0);
        assert_eq!(
            engine.complete_registration(&response, &state).unwrap_err(),
            CeremonyError::ChallengeMismatch
        );
    }

    #[test]
    fn registration_rejects_wrong_origin() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let (_, state) =
            engine.begin_registration(Uuid::new_v4(), "a@x.test", "a@x.test", &[]);

        let response =
            authenticator.registration_response(&state.challenge, "https://evil.example", 0);
        assert_eq!(
            engine.complete_registration(&response, &state).unwrap_err(),
            CeremonyError::OriginMismatch
        );
    }

    #[test]
    fn exclusion_list_carries_existing_credentials() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let existing = stored_credential(&authenticator, 0);

        let (options, _) = engine.begin_registration(
            existing.account_id,
            "a@x.test",
            "a@x.test",
            &[existing.clone()],
        );
        assert_eq!(options.exclude_credentials.len(), 1);
        assert_eq!(options.exclude_credentials[0].id, existing.credential_id);
    }

    #[test]
    fn assertion_round_trip_updates_counter() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let stored = stored_credential(&authenticator, 3);

        let (options, state) = engine.begin_assertion(None, &[stored.clone()]);
        assert_eq!(options.allow_credentials.len(), 1);

        let response =
            authenticator.assertion_response(&state.challenge, "http://localhost:8080", "localhost", 4);
        let new_count = engine.complete_assertion(&response, &state, &stored).unwrap();
        assert_eq!(new_count, 4);
    }

    #[test]
    fn assertion_rejects_counter_regression() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let stored = stored_credential(&authenticator, 10);

        let (_, state) = engine.begin_assertion(None, &[stored.clone()]);

        // Equal counter with a valid signature is still a regression
        let response =
            authenticator.assertion_response(&state.challenge, "http://localhost:8080", "localhost", 10);
        assert_eq!(
            engine.complete_assertion(&response, &state, &stored).unwrap_err(),
            CeremonyError::CounterRegression
        );

        let response =
            authenticator.assertion_response(&state.challenge, "http://localhost:8080", "localhost", 2);
        assert_eq!(
            engine.complete_assertion(&response, &state, &stored).unwrap_err(),
            CeremonyError::CounterRegression
        );
    }

    #[test]
    fn assertion_accepts_counterless_authenticator() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let stored = stored_credential(&authenticator, 0);

        let (_, state) = engine.begin_assertion(None, &[stored.clone()]);
        let response =
            authenticator.assertion_response(&state.challenge, "http://localhost:8080", "localhost", 0);
        assert_eq!(engine.complete_assertion(&response, &state, &stored).unwrap(), 0);
    }

    #[test]
    fn assertion_rejects_forged_signature() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let other = TestAuthenticator::new();
        // Stored public key belongs to a different authenticator
        let stored = stored_credential(&other, 0);

        let (_, state) = engine.begin_assertion(None, &[stored.clone()]);
        let response =
            authenticator.assertion_response(&state.challenge, "http://localhost:8080", "localhost", 1);
        assert_eq!(
            engine.complete_assertion(&response, &state, &stored).unwrap_err(),
            CeremonyError::SignatureInvalid
        );
    }

    #[test]
    fn assertion_rejects_wrong_relying_party() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let stored = stored_credential(&authenticator, 0);

        let (_, state) = engine.begin_assertion(None, &[stored.clone()]);
        let response = authenticator.assertion_response(
            &state.challenge,
            "http://localhost:8080",
            "other-rp.example",
            1,
        );
        assert_eq!(
            engine.complete_assertion(&response, &state, &stored).unwrap_err(),
            CeremonyError::OriginMismatch
        );
    }

    #[test]
    fn state_kind_is_enforced() {
        let engine = engine();
        let authenticator = TestAuthenticator::new();
        let stored = stored_credential(&authenticator, 0);

        let (_, registration_state) =
            engine.begin_registration(Uuid::new_v4(), "a@x.test", "a@x.test", &[]);
        let response = authenticator.assertion_response(
            &registration_state.challenge,
            "http://localhost:8080",
            "localhost",
            1,
        );
        assert_eq!(
            engine
                .complete_assertion(&response, &registration_state, &stored)
                .unwrap_err(),
            CeremonyError::ChallengeMismatch
        );
    }
}
