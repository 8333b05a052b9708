//! ARC chain validation (RFC 8617).
//!
//! An ARC set is the triple ARC-Authentication-Results, ARC-Message-Signature
//! and ARC-Seal sharing one instance number. The chain must be contiguous
//! from 1; each seal declares the validity of everything before it (`cv=`)
//! and signs the ARC headers of every set up to and including its own.
//!
//! Every instance is evaluated even after an earlier one fails, so the
//! report names each broken link rather than only the first.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::canon::{canonicalize_header, strip_b_tag};
use crate::crypto::{verify_signature, CryptoError};
use crate::dkim::{check_key_usage, lenient_tag};
use crate::dns::TxtResolver;
use crate::hash::{body_hash_matches, signed_data};
use crate::key::KeyResolver;
use crate::message::Message;
use crate::result::{Outcome, SignatureReport};
use crate::signature::{
    CanonicalizationMethod, ChainStatus, SealRecord, SignatureRecord, MAX_ARC_INSTANCE,
};

pub const ARC_SEAL: &str = "ARC-Seal";
pub const ARC_MESSAGE_SIGNATURE: &str = "ARC-Message-Signature";
pub const ARC_AUTHENTICATION_RESULTS: &str = "ARC-Authentication-Results";

/// Structural defect that prevents evaluating the chain at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("broken ARC instance sequence: {0}")]
    Order(String),
}

/// Result of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvaluation {
    /// `None` when the message carries no ARC headers.
    pub status: ChainStatus,
    /// One report per instance, in instance order.
    pub reports: Vec<SignatureReport>,
}

/// Header indices of one ARC set.
#[derive(Default)]
struct SetIndices {
    aar: Option<usize>,
    ams: Option<usize>,
    seal: Option<usize>,
    duplicated: bool,
}

/// Validate the message's ARC chain.
///
/// A non-contiguous instance sequence is unrecoverable and returns
/// [`ChainError::Order`]; every other defect is reported per instance and
/// the walk continues.
pub async fn validate_chain<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    clock_skew: u64,
) -> Result<ChainEvaluation, ChainError> {
    let sets = collect_sets(msg)?;
    let Some((&n, _)) = sets.last_key_value() else {
        return Ok(ChainEvaluation {
            status: ChainStatus::None,
            reports: Vec::new(),
        });
    };

    if n as usize != sets.len() {
        let found: Vec<String> = sets.keys().map(|k| k.to_string()).collect();
        return Err(ChainError::Order(format!(
            "instances present: {{{}}}, expected 1..={}",
            found.join(","),
            n
        )));
    }
    debug!(instances = n, "validating ARC chain");

    let mut reports = Vec::with_capacity(n as usize);
    let mut ok_so_far = true;
    for k in 1..=n {
        let set = &sets[&k];
        let expected_cv = if k == 1 {
            ChainStatus::None
        } else if ok_so_far {
            ChainStatus::Pass
        } else {
            ChainStatus::Fail
        };
        let report = evaluate_set(keys, msg, k, set, expected_cv, clock_skew).await;
        ok_so_far = ok_so_far && report.passed();
        reports.push(report);
    }

    Ok(ChainEvaluation {
        status: if ok_so_far {
            ChainStatus::Pass
        } else {
            ChainStatus::Fail
        },
        reports,
    })
}

/// Group ARC headers by instance number. Instance tags must at least parse;
/// a header without one breaks the whole chain.
fn collect_sets(msg: &Message) -> Result<BTreeMap<u32, SetIndices>, ChainError> {
    let mut sets: BTreeMap<u32, SetIndices> = BTreeMap::new();

    for (idx, header) in msg.headers.iter().enumerate() {
        let slot: fn(&mut SetIndices) -> &mut Option<usize> = if header.is_named(ARC_SEAL) {
            |s: &mut SetIndices| &mut s.seal
        } else if header.is_named(ARC_MESSAGE_SIGNATURE) {
            |s: &mut SetIndices| &mut s.ams
        } else if header.is_named(ARC_AUTHENTICATION_RESULTS) {
            |s: &mut SetIndices| &mut s.aar
        } else {
            continue;
        };

        let instance = lenient_tag(&header.value, "i")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&i| i >= 1 && i <= MAX_ARC_INSTANCE)
            .ok_or_else(|| {
                ChainError::Order(format!("{} without a valid i= tag", header.name))
            })?;

        let set = sets.entry(instance).or_default();
        let field = slot(set);
        if field.is_some() {
            set.duplicated = true;
        } else {
            *field = Some(idx);
        }
    }

    Ok(sets)
}

async fn evaluate_set<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    instance: u32,
    set: &SetIndices,
    expected_cv: ChainStatus,
    clock_skew: u64,
) -> SignatureReport {
    let seal_value = set.seal.map(|i| msg.headers[i].value.as_str());
    let report = |outcome, domain: String, selector: String, reason: String| SignatureReport {
        domain,
        selector,
        instance: Some(instance),
        outcome,
        reason,
    };
    // Identity falls back to the seal's tags when the set is too broken to
    // parse properly.
    let lenient_identity = || {
        let d = seal_value.and_then(|v| lenient_tag(v, "d")).unwrap_or_default();
        let s = seal_value.and_then(|v| lenient_tag(v, "s")).unwrap_or_default();
        (d, s)
    };

    let (Some(_), Some(ams_idx), Some(seal_idx)) = (set.aar, set.ams, set.seal) else {
        let (d, s) = lenient_identity();
        return report(
            Outcome::PermError,
            d,
            s,
            "incomplete ARC set: AAR, AMS and AS are all required".to_string(),
        );
    };
    if set.duplicated {
        let (d, s) = lenient_identity();
        return report(
            Outcome::PermError,
            d,
            s,
            "duplicated header within ARC set".to_string(),
        );
    }

    let seal = match SealRecord::parse(&msg.headers[seal_idx].value) {
        Ok(seal) => seal,
        Err(e) => {
            let (d, s) = lenient_identity();
            return report(Outcome::PermError, d, s, format!("unparseable ARC-Seal: {}", e));
        }
    };
    let ams = match SignatureRecord::parse_arc(&msg.headers[ams_idx].value) {
        Ok(ams) => ams,
        Err(e) => {
            return report(
                Outcome::PermError,
                seal.domain,
                seal.selector,
                format!("unparseable ARC-Message-Signature: {}", e),
            );
        }
    };

    if seal.cv != expected_cv {
        return report(
            Outcome::Fail,
            seal.domain,
            seal.selector,
            format!("cv mismatch: declared {}, expected {}", seal.cv, expected_cv),
        );
    }

    if let Err(r) = verify_ams(keys, msg, &ams, ams_idx, clock_skew).await {
        return SignatureReport {
            domain: ams.domain,
            selector: ams.selector,
            instance: Some(instance),
            outcome: r.0,
            reason: r.1,
        };
    }

    if let Err(r) = verify_seal(keys, msg, &seal, seal_idx, instance).await {
        return report(r.0, seal.domain, seal.selector, r.1);
    }

    report(
        Outcome::Pass,
        seal.domain,
        seal.selector,
        "ARC set verified".to_string(),
    )
}

async fn verify_ams<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    ams: &SignatureRecord,
    ams_idx: usize,
    clock_skew: u64,
) -> Result<(), (Outcome, String)> {
    if let Some(x) = ams.expiration {
        if crate::dkim::unix_now() > x.saturating_add(clock_skew) {
            return Err((Outcome::PermError, format!("AMS expired at {}", x)));
        }
    }

    let key = keys
        .resolve(&ams.selector, &ams.domain)
        .await
        .map_err(|e| {
            let outcome = if e.is_temporary() {
                Outcome::TempError
            } else {
                Outcome::PermError
            };
            (outcome, e.to_string())
        })?;

    check_key_usage(ams.algorithm, &key).map_err(|r| (Outcome::PermError, r))?;

    if !body_hash_matches(ams, &msg.body) {
        return Err((Outcome::Fail, "AMS body hash mismatch".to_string()));
    }

    let data = signed_data(ams, &msg.headers, ams_idx);
    match verify_signature(ams.algorithm, &key, &data, &ams.signature) {
        Ok(()) => Ok(()),
        Err(CryptoError::BadSignature) => {
            Err((Outcome::Fail, "AMS signature does not verify".to_string()))
        }
        Err(e @ CryptoError::MalformedKey(_)) => Err((Outcome::PermError, e.to_string())),
    }
}

async fn verify_seal<R: TxtResolver>(
    keys: &KeyResolver<R>,
    msg: &Message,
    seal: &SealRecord,
    seal_idx: usize,
    instance: u32,
) -> Result<(), (Outcome, String)> {
    let key = keys
        .resolve(&seal.selector, &seal.domain)
        .await
        .map_err(|e| {
            let outcome = if e.is_temporary() {
                Outcome::TempError
            } else {
                Outcome::PermError
            };
            (outcome, e.to_string())
        })?;

    check_key_usage(seal.algorithm, &key).map_err(|r| (Outcome::PermError, r))?;

    let data = seal_input(msg, seal_idx, instance)
        .ok_or((Outcome::PermError, "ARC prefix incomplete".to_string()))?;
    match verify_signature(seal.algorithm, &key, &data, &seal.signature) {
        Ok(()) => Ok(()),
        Err(CryptoError::BadSignature) => {
            Err((Outcome::Fail, "seal signature does not verify".to_string()))
        }
        Err(e @ CryptoError::MalformedKey(_)) => Err((Outcome::PermError, e.to_string())),
    }
}

/// Assemble the data an ARC-Seal signs: for every set 1..=instance, the AAR,
/// AMS and AS headers relaxed-canonicalized in that order, with the target
/// seal's `b=` emptied and no CRLF after the final line. The body is never
/// covered.
fn seal_input(msg: &Message, seal_idx: usize, instance: u32) -> Option<Vec<u8>> {
    let find = |name: &str, wanted: u32| {
        msg.headers.iter().position(|h| {
            h.is_named(name)
                && lenient_tag(&h.value, "i").and_then(|v| v.parse::<u32>().ok()) == Some(wanted)
        })
    };

    let mut out = Vec::new();
    for k in 1..=instance {
        for name in [ARC_AUTHENTICATION_RESULTS, ARC_MESSAGE_SIGNATURE, ARC_SEAL] {
            let idx = find(name, k)?;
            let header = &msg.headers[idx];
            if idx == seal_idx {
                out.extend_from_slice(
                    canonicalize_header(
                        CanonicalizationMethod::Relaxed,
                        &header.name,
                        &strip_b_tag(&header.value),
                    )
                    .as_bytes(),
                );
            } else {
                out.extend_from_slice(
                    canonicalize_header(
                        CanonicalizationMethod::Relaxed,
                        &header.name,
                        &header.value,
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(b"\r\n");
            }
        }
    }
    Some(out)
}
