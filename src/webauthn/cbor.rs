//! CBOR and authenticator-data processing
//!
//! Parses attestation objects and COSE public keys per the W3C `WebAuthn`
//! specification. The authenticator data layout:
//!
//! - 32 bytes: RP ID hash
//! - 1 byte: flags (0x01 user present, 0x40 attested credential data)
//! - 4 bytes: signature counter (big-endian)
//! - attested credential data, when flag 0x40 is set:
//!   - 16 bytes: AAGUID
//!   - 2 bytes: credential ID length (big-endian)
//!   - L bytes: credential ID
//!   - variable: COSE public key (one CBOR value)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::value::Value;

use super::errors::CeremonyError;

/// Flags byte offsets within authenticator data
const FLAGS_OFFSET: usize = 32;
const COUNTER_OFFSET: usize = 33;
const ATTESTED_DATA_OFFSET: usize = 37;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

/// Credential data extracted from an attestation object
#[derive(Debug)]
pub struct AttestedCredential {
    pub credential_id: Vec<u8>,
    pub public_key_cose: Vec<u8>,
    pub sign_count: u32,
}

fn encoding_err(msg: &str) -> CeremonyError {
    CeremonyError::Encoding(msg.to_string())
}

/// Decode base64url without padding
pub fn decode_b64(input: &str) -> Result<Vec<u8>, CeremonyError> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|_| encoding_err("invalid base64url data"))
}

/// Parse an attestation object and extract the new credential
///
/// Attestation statements are not chained to a root here (attestation
/// preference is "none"); the credential id, COSE key, and initial counter
/// come from the authenticator data.
///
/// # Errors
/// Returns `CeremonyError::Encoding` when the CBOR structure, flags, or
/// authData layout is malformed.
pub fn parse_attestation_object(
    attestation_object_b64: &str,
) -> Result<AttestedCredential, CeremonyError> {
    let attestation_bytes = decode_b64(attestation_object_b64)?;

    let attestation: Value = ciborium::de::from_reader(&attestation_bytes[..])
        .map_err(|_| encoding_err("invalid CBOR attestation format"))?;

    let Some(Some(auth_data)) = attestation.as_map().map(|map| {
        map.iter()
            .find(|(k, _)| k.as_text() == Some("authData"))
            .and_then(|(_, v)| v.as_bytes())
    }) else {
        return Err(encoding_err("missing authData in attestation"));
    };

    if auth_data.len() < ATTESTED_DATA_OFFSET {
        return Err(encoding_err("authenticator data too short"));
    }

    let flags = auth_data[FLAGS_OFFSET];
    if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
        return Err(encoding_err("no attested credential data"));
    }

    let sign_count = u32::from_be_bytes([
        auth_data[COUNTER_OFFSET],
        auth_data[COUNTER_OFFSET + 1],
        auth_data[COUNTER_OFFSET + 2],
        auth_data[COUNTER_OFFSET + 3],
    ]);

    // Skip AAGUID
    let mut pos = ATTESTED_DATA_OFFSET + 16;
    if auth_data.len() < pos + 2 {
        return Err(encoding_err("authenticator data too short for credential id length"));
    }

    let id_len = ((auth_data[pos] as usize) << 8) | (auth_data[pos + 1] as usize);
    pos += 2;
    if auth_data.len() < pos + id_len {
        return Err(encoding_err("authenticator data too short for credential id"));
    }

    let credential_id = auth_data[pos..pos + id_len].to_vec();
    pos += id_len;

    if auth_data.len() <= pos {
        return Err(encoding_err("authenticator data too short for public key"));
    }

    // Validate the COSE key is one well-formed CBOR value and re-serialize
    // it in isolation, dropping any trailing extension data.
    let cose_value: Value = ciborium::de::from_reader(&auth_data[pos..])
        .map_err(|_| encoding_err("invalid COSE public key"))?;
    let mut public_key_cose = Vec::new();
    ciborium::ser::into_writer(&cose_value, &mut public_key_cose)
        .map_err(|_| encoding_err("invalid COSE public key"))?;

    Ok(AttestedCredential {
        credential_id,
        public_key_cose,
        sign_count,
    })
}

/// Parsed assertion authenticator data
pub struct AssertionData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
}

/// Parse the fixed-size prefix of assertion authenticator data
///
/// # Errors
/// Returns `CeremonyError::Encoding` when the data is shorter than the
/// 37-byte minimum.
pub fn parse_assertion_data(auth_data: &[u8]) -> Result<AssertionData, CeremonyError> {
    if auth_data.len() < ATTESTED_DATA_OFFSET {
        return Err(encoding_err("authenticator data too short"));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&auth_data[..32]);

    Ok(AssertionData {
        rp_id_hash,
        flags: auth_data[FLAGS_OFFSET],
        sign_count: u32::from_be_bytes([
            auth_data[COUNTER_OFFSET],
            auth_data[COUNTER_OFFSET + 1],
            auth_data[COUNTER_OFFSET + 2],
            auth_data[COUNTER_OFFSET + 3],
        ]),
    })
}

/// Verification key material extracted from a COSE public key
#[derive(Debug)]
pub enum CoseKey {
    /// Uncompressed SEC1 point (0x04 || x || y) for ECDSA P-256
    Es256 { sec1: Vec<u8> },
    /// PKCS#1 DER `RSAPublicKey` for RSASSA-PKCS1-v1_5 with SHA-256
    Rs256 { pkcs1_der: Vec<u8> },
}

fn map_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    let key = Value::Integer(key.into());
    map.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

fn map_get_bytes(map: &[(Value, Value)], key: i64) -> Option<Vec<u8>> {
    map_get(map, key).and_then(|v| v.as_bytes().cloned())
}

fn map_get_int(map: &[(Value, Value)], key: i64) -> Option<i64> {
    map_get(map, key).and_then(|v| match v {
        Value::Integer(i) => i128::from(*i).try_into().ok(),
        _ => None,
    })
}

/// Extract a verification key from a COSE-encoded public key
///
/// Supports EC2/ES256 (kty 2, alg -7, curve P-256) and RSA/RS256
/// (kty 3, alg -257), the two algorithms offered at registration.
///
/// # Errors
/// Returns `CeremonyError::Encoding` for malformed keys and
/// `CeremonyError::NotSupported` for other key types or algorithms.
pub fn extract_cose_key(public_key: &[u8]) -> Result<CoseKey, CeremonyError> {
    let cose: Value = ciborium::de::from_reader(public_key)
        .map_err(|_| encoding_err("invalid COSE key format"))?;

    let Value::Map(map) = cose else {
        return Err(encoding_err("COSE key is not a map"));
    };

    let kty = map_get_int(&map, 1).ok_or_else(|| encoding_err("missing COSE key type"))?;
    let alg = map_get_int(&map, 3).ok_or_else(|| encoding_err("missing COSE algorithm"))?;

    match (kty, alg) {
        // EC2 key with ES256
        (2, -7) => {
            let crv = map_get_int(&map, -1)
                .ok_or_else(|| encoding_err("missing COSE curve"))?;
            if crv != 1 {
                return Err(CeremonyError::NotSupported(format!(
                    "unsupported curve: {crv}"
                )));
            }
            let x = map_get_bytes(&map, -2)
                .ok_or_else(|| encoding_err("missing x coordinate"))?;
            let y = map_get_bytes(&map, -3)
                .ok_or_else(|| encoding_err("missing y coordinate"))?;
            if x.len() != 32 || y.len() != 32 {
                return Err(encoding_err("invalid P-256 coordinate length"));
            }

            let mut sec1 = Vec::with_capacity(65);
            sec1.push(0x04); // Uncompressed point format
            sec1.extend_from_slice(&x);
            sec1.extend_from_slice(&y);
            Ok(CoseKey::Es256 { sec1 })
        }
        // RSA key with RS256
        (3, -257) => {
            let n = map_get_bytes(&map, -1)
                .ok_or_else(|| encoding_err("missing RSA modulus"))?;
            let e = map_get_bytes(&map, -2)
                .ok_or_else(|| encoding_err("missing RSA exponent"))?;
            Ok(CoseKey::Rs256 {
                pkcs1_der: rsa_public_key_der(&n, &e),
            })
        }
        _ => Err(CeremonyError::NotSupported(format!(
            "unsupported key type {kty} / algorithm {alg}"
        ))),
    }
}

/// Encode an RSA public key as PKCS#1 DER: SEQUENCE { INTEGER n, INTEGER e }
fn rsa_public_key_der(n: &[u8], e: &[u8]) -> Vec<u8> {
    fn der_integer(bytes: &[u8]) -> Vec<u8> {
        let stripped: &[u8] = {
            let mut value = bytes;
            while value.len() > 1 && value[0] == 0 {
                value = &value[1..];
            }
            value
        };
        // Prefix with 0x00 when the high bit is set so the value stays positive
        let needs_pad = stripped.first().is_some_and(|b| b & 0x80 != 0);
        let mut content = Vec::with_capacity(stripped.len() + 1);
        if needs_pad {
            content.push(0x00);
        }
        content.extend_from_slice(stripped);

        let mut out = vec![0x02];
        out.extend_from_slice(&der_length(content.len()));
        out.extend_from_slice(&content);
        out
    }

    fn der_length(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![u8::try_from(len).unwrap_or(0)]
        } else {
            let bytes: Vec<u8> = len
                .to_be_bytes()
                .iter()
                .copied()
                .skip_while(|b| *b == 0)
                .collect();
            let mut out = vec![0x80 | u8::try_from(bytes.len()).unwrap_or(0)];
            out.extend_from_slice(&bytes);
            out
        }
    }

    let mut body = der_integer(n);
    body.extend_from_slice(&der_integer(e));

    let mut out = vec![0x30];
    out.extend_from_slice(&der_length(body.len()));
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal ES256 COSE key map
    fn es256_cose(x: &[u8; 32], y: &[u8; 32]) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
            (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    }

    fn build_auth_data(flags: u8, sign_count: u32, cred_id: &[u8], cose: &[u8]) -> Vec<u8> {
        let mut auth_data = vec![0u8; 32]; // RP ID hash
        auth_data.push(flags);
        auth_data.extend_from_slice(&sign_count.to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]); // AAGUID
        auth_data.extend_from_slice(&u16::try_from(cred_id.len()).unwrap().to_be_bytes());
        auth_data.extend_from_slice(cred_id);
        auth_data.extend_from_slice(cose);
        auth_data
    }

    fn build_attestation(auth_data: &[u8]) -> String {
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (Value::Text("attStmt".into()), Value::Map(vec![])),
            (
                Value::Text("authData".into()),
                Value::Bytes(auth_data.to_vec()),
            ),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        URL_SAFE_NO_PAD.encode(out)
    }

    #[test]
    fn parses_attestation_object() {
        let cose = es256_cose(&[1u8; 32], &[2u8; 32]);
        let auth_data = build_auth_data(
            FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA,
            7,
            b"credential-id",
            &cose,
        );
        let attested = parse_attestation_object(&build_attestation(&auth_data)).unwrap();

        assert_eq!(attested.credential_id, b"credential-id");
        assert_eq!(attested.sign_count, 7);
        assert_eq!(attested.public_key_cose, cose);
    }

    #[test]
    fn rejects_missing_attested_credential_data() {
        let cose = es256_cose(&[1u8; 32], &[2u8; 32]);
        let auth_data = build_auth_data(FLAG_USER_PRESENT, 0, b"id", &cose);
        let err = parse_attestation_object(&build_attestation(&auth_data)).unwrap_err();
        assert_eq!(err.kind(), "encoding_error");
    }

    #[test]
    fn rejects_truncated_auth_data() {
        let map = Value::Map(vec![(
            Value::Text("authData".into()),
            Value::Bytes(vec![0u8; 10]),
        )]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        let err = parse_attestation_object(&URL_SAFE_NO_PAD.encode(out)).unwrap_err();
        assert_eq!(err.kind(), "encoding_error");
    }

    #[test]
    fn extracts_es256_key() {
        let cose = es256_cose(&[3u8; 32], &[4u8; 32]);
        match extract_cose_key(&cose).unwrap() {
            CoseKey::Es256 { sec1 } => {
                assert_eq!(sec1.len(), 65);
                assert_eq!(sec1[0], 0x04);
                assert_eq!(&sec1[1..33], &[3u8; 32]);
            }
            CoseKey::Rs256 { .. } => panic!("expected EC2 key"),
        }
    }

    #[test]
    fn extracts_rs256_key_as_der() {
        let n = vec![0xB5; 256];
        let e = vec![0x01, 0x00, 0x01];
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(3.into())),
            (Value::Integer(3.into()), Value::Integer((-257).into())),
            (Value::Integer((-1).into()), Value::Bytes(n)),
            (Value::Integer((-2).into()), Value::Bytes(e)),
        ]);
        let mut cose = Vec::new();
        ciborium::ser::into_writer(&map, &mut cose).unwrap();

        match extract_cose_key(&cose).unwrap() {
            CoseKey::Rs256 { pkcs1_der } => {
                assert_eq!(pkcs1_der[0], 0x30); // SEQUENCE
                // Modulus has its high bit set, so DER pads it with 0x00
                assert!(pkcs1_der.windows(2).any(|w| w == [0x00, 0xB5].as_slice()));
            }
            CoseKey::Es256 { .. } => panic!("expected RSA key"),
        }
    }

    #[test]
    fn rejects_unknown_key_type() {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(1.into())), // OKP
            (Value::Integer(3.into()), Value::Integer((-8).into())), // EdDSA
        ]);
        let mut cose = Vec::new();
        ciborium::ser::into_writer(&map, &mut cose).unwrap();
        let err = extract_cose_key(&cose).unwrap_err();
        assert_eq!(err.kind(), "not_supported");
    }

    #[test]
    fn parses_assertion_counter() {
        let mut auth_data = vec![9u8; 32];
        auth_data.push(FLAG_USER_PRESENT);
        auth_data.extend_from_slice(&42u32.to_be_bytes());

        let parsed = parse_assertion_data(&auth_data).unwrap();
        assert_eq!(parsed.sign_count, 42);
        assert_eq!(parsed.flags, FLAG_USER_PRESENT);
        assert_eq!(parsed.rp_id_hash, [9u8; 32]);

        assert!(parse_assertion_data(&auth_data[..36]).is_err());
    }
}
