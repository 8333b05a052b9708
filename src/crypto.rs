//! Signature verification over ring.
//!
//! RSA keys arrive as SPKI DER from the TXT record; ring's RSA verifiers
//! expect PKCS#1, so the SPKI wrapper is unwrapped first. Ed25519 keys are
//! the raw 32 public key bytes.

use ring::signature::{self, UnparsedPublicKey};
use thiserror::Error;

use crate::key::{KeyRecord, KeyType};
use crate::signature::Algorithm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    #[error("signature does not verify")]
    BadSignature,
}

/// Verify `signature` over `data` with the given key and algorithm.
///
/// The caller has already checked that the key type matches the algorithm;
/// a mismatch here is reported as a malformed key.
pub fn verify_signature(
    algorithm: Algorithm,
    key: &KeyRecord,
    data: &[u8],
    sig: &[u8],
) -> Result<(), CryptoError> {
    match (algorithm, key.key_type) {
        (Algorithm::Ed25519Sha256, KeyType::Ed25519) => {
            if key.key_bytes.len() != 32 {
                return Err(CryptoError::MalformedKey(format!(
                    "ed25519 key is {} bytes, expected 32",
                    key.key_bytes.len()
                )));
            }
            UnparsedPublicKey::new(&signature::ED25519, &key.key_bytes)
                .verify(data, sig)
                .map_err(|_| CryptoError::BadSignature)
        }
        (Algorithm::RsaSha1 | Algorithm::RsaSha256, KeyType::Rsa) => {
            let pkcs1 = unwrap_spki(&key.key_bytes)?;
            let params = rsa_params(algorithm, pkcs1.len());
            UnparsedPublicKey::new(params, pkcs1)
                .verify(data, sig)
                .map_err(|_| CryptoError::BadSignature)
        }
        (a, k) => Err(CryptoError::MalformedKey(format!(
            "key type {:?} cannot verify {:?}",
            k, a
        ))),
    }
}

fn rsa_params(
    algorithm: Algorithm,
    pkcs1_len: usize,
) -> &'static dyn signature::VerificationAlgorithm {
    // A 2048-bit modulus yields a PKCS#1 structure of roughly 270 bytes;
    // anything shorter is a legacy 1024-bit key.
    let legacy = pkcs1_len < 256;
    match (algorithm, legacy) {
        (Algorithm::RsaSha256, false) => &signature::RSA_PKCS1_2048_8192_SHA256,
        (Algorithm::RsaSha256, true) => {
            &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY
        }
        (_, false) => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        (_, true) => &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
    }
}

const RSA_OID: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01,
];

/// Extract the PKCS#1 RSAPublicKey from an SPKI SubjectPublicKeyInfo.
/// Keys already in PKCS#1 form pass through unchanged.
fn unwrap_spki(der: &[u8]) -> Result<&[u8], CryptoError> {
    if der.is_empty() || der[0] != 0x30 {
        return Err(CryptoError::MalformedKey(
            "key is not a DER SEQUENCE".to_string(),
        ));
    }
    if !contains(der, RSA_OID) {
        // No rsaEncryption OID: treat as bare PKCS#1.
        return Ok(der);
    }

    // SPKI layout: SEQUENCE { SEQUENCE { OID, NULL }, BIT STRING { PKCS#1 } }
    let (_, mut rest) = read_tlv(der, 0x30)?;
    let (_, after_alg) = read_tlv(rest, 0x30)?;
    rest = after_alg;
    let (bits, _) = read_tlv(rest, 0x03)?;
    // The BIT STRING starts with an unused-bits count, zero for key material.
    match bits.split_first() {
        Some((0, inner)) if !inner.is_empty() && inner[0] == 0x30 => Ok(inner),
        _ => Err(CryptoError::MalformedKey(
            "bad BIT STRING in SubjectPublicKeyInfo".to_string(),
        )),
    }
}

/// Read one DER TLV: returns (contents, rest after the element).
fn read_tlv(der: &[u8], expected_tag: u8) -> Result<(&[u8], &[u8]), CryptoError> {
    let err = || CryptoError::MalformedKey("truncated DER element".to_string());
    let (&tag, rest) = der.split_first().ok_or_else(err)?;
    if tag != expected_tag {
        return Err(CryptoError::MalformedKey(format!(
            "unexpected DER tag {:#04x}, wanted {:#04x}",
            tag, expected_tag
        )));
    }
    let (&first, rest) = rest.split_first().ok_or_else(err)?;
    let (len, rest) = if first < 0x80 {
        (first as usize, rest)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || rest.len() < n {
            return Err(err());
        }
        let mut len = 0usize;
        for &b in &rest[..n] {
            len = (len << 8) | b as usize;
        }
        (len, &rest[n..])
    };
    if rest.len() < len {
        return Err(err());
    }
    Ok((&rest[..len], &rest[len..]))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
