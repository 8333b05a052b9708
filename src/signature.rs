//! Tag=value records: `DKIM-Signature`, `ARC-Message-Signature`, `ARC-Seal`.
//!
//! `DKIM-Signature` and `ARC-Message-Signature` share one shape
//! ([`SignatureRecord`]); they differ only in required tags and defaults.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashSet;
use thiserror::Error;

/// Error parsing a signature, seal or key record. The affected signature
/// becomes a permanent error; other signatures proceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing required tag: {0}")]
    MissingTag(&'static str),
    #[error("duplicate tag: {0}")]
    DuplicateTag(String),
    #[error("unsupported version: {0}")]
    BadVersion(String),
    #[error("unsupported algorithm: {0}")]
    BadAlgorithm(String),
    #[error("unknown canonicalization: {0}")]
    BadCanonicalization(String),
    #[error("invalid base64 in {tag}=: {detail}")]
    BadBase64 { tag: &'static str, detail: String },
    #[error("invalid instance number: {0}")]
    BadInstance(String),
    #[error("invalid cv value: {0}")]
    BadChainStatus(String),
    #[error("h= does not include from")]
    FromNotSigned,
    #[error("h= must not include {0}")]
    ForbiddenHeader(String),
    #[error("unsupported key type: {0}")]
    BadKeyType(String),
    #[error("invalid key record: {0}")]
    BadKeyRecord(String),
}

/// Signing algorithm (`a=` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Verify-only; signers must not produce it.
    RsaSha1,
    RsaSha256,
    Ed25519Sha256,
}

impl Algorithm {
    pub fn parse(s: &str) -> Result<Self, RecordError> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-sha1" => Ok(Algorithm::RsaSha1),
            "rsa-sha256" => Ok(Algorithm::RsaSha256),
            "ed25519-sha256" => Ok(Algorithm::Ed25519Sha256),
            other => Err(RecordError::BadAlgorithm(other.to_string())),
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Algorithm::RsaSha1 => HashAlgorithm::Sha1,
            Algorithm::RsaSha256 | Algorithm::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }
}

/// Digest algorithm underlying a signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Canonicalization mode for headers or body (`c=` tag halves).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalizationMethod {
    Simple,
    Relaxed,
}

/// Chain validation status declared by an ARC-Seal (`cv=` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    None,
    Pass,
    Fail,
}

impl ChainStatus {
    pub fn parse(s: &str) -> Result<Self, RecordError> {
        match s {
            "none" => Ok(ChainStatus::None),
            "pass" => Ok(ChainStatus::Pass),
            "fail" => Ok(ChainStatus::Fail),
            other => Err(RecordError::BadChainStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStatus::None => write!(f, "none"),
            ChainStatus::Pass => write!(f, "pass"),
            ChainStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Highest ARC instance number a chain may carry (RFC 8617).
pub const MAX_ARC_INSTANCE: u32 = 50;

/// Parsed `DKIM-Signature` or `ARC-Message-Signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// ARC instance number; `None` for DKIM-Signature.
    pub instance: Option<u32>,
    pub algorithm: Algorithm,
    pub domain: String,
    pub selector: String,
    pub header_canon: CanonicalizationMethod,
    pub body_canon: CanonicalizationMethod,
    /// Ordered `h=` list, lower-cased. May name a header more often than it
    /// occurs (over-signing).
    pub signed_headers: Vec<String>,
    /// Declared body hash (`bh=`), decoded.
    pub body_hash: Vec<u8>,
    /// Signature bytes (`b=`), decoded.
    pub signature: Vec<u8>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    pub body_length: Option<u64>,
    /// Original header value, for `b=` stripping during verification.
    pub raw_value: String,
}

impl SignatureRecord {
    /// Parse a `DKIM-Signature` header value. Requires `v=1` and `from` in
    /// the `h=` list; canonicalization defaults to simple/simple.
    pub fn parse_dkim(value: &str) -> Result<Self, RecordError> {
        let tags = parse_tag_list(value)?;

        match find_tag(&tags, "v") {
            Some("1") => {}
            Some(other) => return Err(RecordError::BadVersion(other.to_string())),
            None => return Err(RecordError::MissingTag("v")),
        }

        let record = Self::from_tags(&tags, value, CanonicalizationMethod::Simple)?;
        if !record.signed_headers.iter().any(|h| h == "from") {
            return Err(RecordError::FromNotSigned);
        }
        Ok(record)
    }

    /// Parse an `ARC-Message-Signature` header value. Requires `i=`;
    /// canonicalization defaults to relaxed/relaxed.
    pub fn parse_arc(value: &str) -> Result<Self, RecordError> {
        let tags = parse_tag_list(value)?;
        let instance = parse_instance_tag(&tags)?;

        let mut record = Self::from_tags(&tags, value, CanonicalizationMethod::Relaxed)?;
        record.instance = Some(instance);

        // An AMS must not sign the seal headers it is sealed under.
        for h in &record.signed_headers {
            if h == "arc-seal" {
                return Err(RecordError::ForbiddenHeader(h.clone()));
            }
        }
        Ok(record)
    }

    fn from_tags(
        tags: &[(String, String)],
        raw_value: &str,
        default_canon: CanonicalizationMethod,
    ) -> Result<Self, RecordError> {
        let algorithm = Algorithm::parse(required(tags, "a")?)?;
        let domain = required(tags, "d")?.to_ascii_lowercase();
        let selector = required(tags, "s")?.to_string();

        let (header_canon, body_canon) = match find_tag(tags, "c") {
            Some(c) => parse_canonicalization(c)?,
            None => (default_canon, default_canon),
        };

        let signed_headers: Vec<String> = required(tags, "h")?
            .split(':')
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        let body_hash = decode_base64_tag(required(tags, "bh")?, "bh")?;
        let signature = decode_base64_tag(required(tags, "b")?, "b")?;

        Ok(SignatureRecord {
            instance: None,
            algorithm,
            domain,
            selector,
            header_canon,
            body_canon,
            signed_headers,
            body_hash,
            signature,
            timestamp: find_tag(tags, "t").and_then(|v| v.parse().ok()),
            expiration: find_tag(tags, "x").and_then(|v| v.parse().ok()),
            body_length: find_tag(tags, "l").and_then(|v| v.parse().ok()),
            raw_value: raw_value.to_string(),
        })
    }
}

/// Parsed `ARC-Seal` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealRecord {
    pub instance: u32,
    pub cv: ChainStatus,
    pub algorithm: Algorithm,
    pub domain: String,
    pub selector: String,
    pub timestamp: Option<u64>,
    /// Signature bytes (`b=`), decoded. Signs the ARC header prefix up to and
    /// including this seal with its own `b=` emptied; never the body.
    pub signature: Vec<u8>,
    /// Original header value, for `b=` stripping during verification.
    pub raw_value: String,
}

impl SealRecord {
    pub fn parse(value: &str) -> Result<Self, RecordError> {
        let tags = parse_tag_list(value)?;
        let instance = parse_instance_tag(&tags)?;
        let cv = ChainStatus::parse(required(&tags, "cv")?)?;
        let algorithm = Algorithm::parse(required(&tags, "a")?)?;
        let domain = required(&tags, "d")?.to_ascii_lowercase();
        let selector = required(&tags, "s")?.to_string();
        let signature = decode_base64_tag(required(&tags, "b")?, "b")?;

        Ok(SealRecord {
            instance,
            cv,
            algorithm,
            domain,
            selector,
            timestamp: find_tag(&tags, "t").and_then(|v| v.parse().ok()),
            signature,
            raw_value: value.to_string(),
        })
    }
}

// ── Tag list plumbing ────────────────────────────────────────────────

/// Parse a `;`-separated tag=value list, unfolding first. Rejects duplicate
/// tags; entries without `=` are skipped.
pub(crate) fn parse_tag_list(input: &str) -> Result<Vec<(String, String)>, RecordError> {
    let unfolded = input.replace("\r\n", "").replace('\n', "").replace('\t', " ");

    let mut tags = Vec::new();
    let mut seen = HashSet::new();
    for part in unfolded.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((tag, value)) = part.split_once('=') {
            let tag = tag.trim().to_ascii_lowercase();
            if !seen.insert(tag.clone()) {
                return Err(RecordError::DuplicateTag(tag));
            }
            tags.push((tag, value.trim().to_string()));
        }
    }
    Ok(tags)
}

pub(crate) fn find_tag<'a>(tags: &'a [(String, String)], name: &str) -> Option<&'a str> {
    tags.iter().find(|(t, _)| t == name).map(|(_, v)| v.as_str())
}

fn required<'a>(tags: &'a [(String, String)], name: &'static str) -> Result<&'a str, RecordError> {
    find_tag(tags, name).ok_or(RecordError::MissingTag(name))
}

fn decode_base64_tag(value: &str, tag: &'static str) -> Result<Vec<u8>, RecordError> {
    let cleaned: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64.decode(&cleaned).map_err(|e| RecordError::BadBase64 {
        tag,
        detail: e.to_string(),
    })
}

fn parse_instance_tag(tags: &[(String, String)]) -> Result<u32, RecordError> {
    let raw = find_tag(tags, "i").ok_or(RecordError::MissingTag("i"))?;
    let n: u32 = raw
        .parse()
        .map_err(|_| RecordError::BadInstance(raw.to_string()))?;
    if n == 0 || n > MAX_ARC_INSTANCE {
        return Err(RecordError::BadInstance(raw.to_string()));
    }
    Ok(n)
}

fn parse_canonicalization(
    value: &str,
) -> Result<(CanonicalizationMethod, CanonicalizationMethod), RecordError> {
    let parse_one = |s: &str| match s.trim().to_ascii_lowercase().as_str() {
        "simple" => Ok(CanonicalizationMethod::Simple),
        "relaxed" => Ok(CanonicalizationMethod::Relaxed),
        other => Err(RecordError::BadCanonicalization(other.to_string())),
    };
    match value.split_once('/') {
        // Per RFC 6376, a lone header mode implies simple body.
        None => Ok((parse_one(value)?, CanonicalizationMethod::Simple)),
        Some((h, b)) => Ok((parse_one(h)?, parse_one(b)?)),
    }
}
