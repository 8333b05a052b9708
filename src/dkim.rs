//! DKIM-Signature verification (RFC 6376).
//!
//! Each signature is evaluated independently: a malformed or failing
//! signature never stops its siblings. The caller decides what a single
//! pass means for the message.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::crypto::{verify_signature, CryptoError};
use crate::dns::TxtResolver;
use crate::hash::{body_hash_matches, signed_data};
use crate::key::{KeyFlag, KeyRecord, KeyResolver, KeyType};
use crate::message::Message;
use crate::result::{Outcome, SignatureReport};
use crate::signature::{Algorithm, SignatureRecord};

pub const DKIM_SIGNATURE: &str = "DKIM-Signature";

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verify every DKIM-Signature on the message. Returns one report per
/// signature header, in message order; empty when the message carries none.
pub async fn verify_signatures<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    clock_skew: u64,
) -> Vec<SignatureReport> {
    let mut reports = Vec::new();
    for index in msg.find_all(DKIM_SIGNATURE) {
        let value = &msg.headers[index].value;
        let record = match SignatureRecord::parse_dkim(value) {
            Ok(r) => r,
            Err(e) => {
                reports.push(SignatureReport {
                    domain: lenient_tag(value, "d").unwrap_or_default(),
                    selector: lenient_tag(value, "s").unwrap_or_default(),
                    instance: None,
                    outcome: Outcome::PermError,
                    reason: format!("unparseable signature: {}", e),
                });
                continue;
            }
        };
        debug!(domain = %record.domain, selector = %record.selector, "verifying DKIM signature");
        reports.push(verify_one(keys, msg, &record, index, clock_skew).await);
    }
    reports
}

async fn verify_one<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    record: &SignatureRecord,
    index: usize,
    clock_skew: u64,
) -> SignatureReport {
    let report = |outcome, reason: String| SignatureReport {
        domain: record.domain.clone(),
        selector: record.selector.clone(),
        instance: None,
        outcome,
        reason,
    };

    // Expiry is checked before any network traffic.
    if let Some(x) = record.expiration {
        if unix_now() > x.saturating_add(clock_skew) {
            return report(Outcome::PermError, format!("signature expired at {}", x));
        }
    }

    let key = match keys.resolve(&record.selector, &record.domain).await {
        Ok(key) => key,
        Err(e) => {
            let outcome = if e.is_temporary() {
                Outcome::TempError
            } else {
                Outcome::PermError
            };
            return report(outcome, e.to_string());
        }
    };

    if let Err(reason) = check_key_constraints(record, &key) {
        return report(Outcome::PermError, reason);
    }

    if !body_hash_matches(record, &msg.body) {
        return report(Outcome::Fail, "body hash mismatch".to_string());
    }

    let data = signed_data(record, &msg.headers, index);
    match verify_signature(record.algorithm, &key, &data, &record.signature) {
        Ok(()) => report(Outcome::Pass, "signature verified".to_string()),
        Err(CryptoError::BadSignature) => {
            report(Outcome::Fail, "signature does not verify".to_string())
        }
        Err(e @ CryptoError::MalformedKey(_)) => report(Outcome::PermError, e.to_string()),
    }
}

/// Restrictions any record, DKIM or ARC, must satisfy against the key it
/// names: matching key type, permitted hash, permitted service type.
pub(crate) fn check_key_usage(algorithm: Algorithm, key: &KeyRecord) -> Result<(), String> {
    let matches_type = matches!(
        (algorithm, key.key_type),
        (Algorithm::RsaSha1 | Algorithm::RsaSha256, KeyType::Rsa)
            | (Algorithm::Ed25519Sha256, KeyType::Ed25519)
    );
    if !matches_type {
        return Err("key type does not match signing algorithm".to_string());
    }

    if let Some(hashes) = &key.hash_algorithms {
        if !hashes.contains(&algorithm.hash_algorithm()) {
            return Err("hash algorithm not permitted by key h= tag".to_string());
        }
    }

    if !key.permits_email() {
        return Err("key s= tag does not permit email".to_string());
    }

    Ok(())
}

/// DKIM layers the `t=s` AUID rule on top of the shared usage checks. ARC
/// records carry an instance number in `i=`, not an identity, so they use
/// [`check_key_usage`] directly.
pub(crate) fn check_key_constraints(
    record: &SignatureRecord,
    key: &KeyRecord,
) -> Result<(), String> {
    check_key_usage(record.algorithm, key)?;

    if key.flags.contains(&KeyFlag::Strict) {
        // t=s: any i= identity must sit directly on d=, not a subdomain.
        if let Some(auid) = lenient_tag(&record.raw_value, "i") {
            match auid.rsplit_once('@') {
                Some((_, domain)) if domain.eq_ignore_ascii_case(&record.domain) => {}
                _ => return Err("i= identity violates key t=s restriction".to_string()),
            }
        }
    }

    Ok(())
}

/// Best-effort extraction of one tag from an unvalidated header value, for
/// report identity and auxiliary tags. Never fails.
pub(crate) fn lenient_tag(value: &str, name: &str) -> Option<String> {
    let unfolded = value.replace("\r\n", "").replace('\n', "");
    for part in unfolded.split(';') {
        if let Some((tag, v)) = part.split_once('=') {
            if tag.trim().eq_ignore_ascii_case(name) {
                return Some(v.trim().to_string());
            }
        }
    }
    None
}
