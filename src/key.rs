//! Public key retrieval and parsing.
//!
//! A signature's key lives in a DNS TXT record at
//! `selector._domainkey.domain`. [`KeyResolver`] issues the lookup through
//! the injected [`TxtResolver`], parses the record, and caches the outcome
//! per `(selector, domain)` so one multi-signature verification (an ARC chain
//! re-using a domain across instances, say) resolves each key once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, trace};

use crate::dns::{DnsError, TxtResolver};
use crate::signature::{find_tag, parse_tag_list, HashAlgorithm, RecordError};

/// Key type from the record's `k=` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl KeyType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Some(KeyType::Rsa),
            "ed25519" => Some(KeyType::Ed25519),
            _ => None,
        }
    }
}

/// Key flags from the record's `t=` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFlag {
    /// `t=y`: domain is testing its deployment.
    Testing,
    /// `t=s`: no subdomain signing.
    Strict,
}

/// Parsed DKIM public key TXT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key_type: KeyType,
    /// Decoded `p=` bytes: SPKI DER for RSA, raw 32 bytes for Ed25519.
    pub key_bytes: Vec<u8>,
    /// Empty `p=` tag: the key has been revoked.
    pub revoked: bool,
    /// `h=` restriction; `None` allows any hash.
    pub hash_algorithms: Option<Vec<HashAlgorithm>>,
    /// `s=` restriction; `None` means the default `*`.
    pub service_types: Option<Vec<String>>,
    pub flags: Vec<KeyFlag>,
    /// Free-form administrator notes (`n=`).
    pub notes: Option<String>,
}

impl KeyRecord {
    /// Parse a key record from the concatenated TXT record strings.
    pub fn parse(txt: &str) -> Result<Self, RecordError> {
        let tags = parse_tag_list(txt)?;

        if let Some(v) = find_tag(&tags, "v") {
            if v != "DKIM1" {
                return Err(RecordError::BadVersion(v.to_string()));
            }
        }

        let key_type = match find_tag(&tags, "k") {
            Some(k) => KeyType::parse(k).ok_or_else(|| RecordError::BadKeyType(k.to_string()))?,
            None => KeyType::Rsa,
        };

        let p = find_tag(&tags, "p").ok_or(RecordError::MissingTag("p"))?;
        let (key_bytes, revoked) = if p.is_empty() {
            (Vec::new(), true)
        } else {
            let cleaned: String = p.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            let decoded = BASE64
                .decode(&cleaned)
                .map_err(|e| RecordError::BadBase64 {
                    tag: "p",
                    detail: e.to_string(),
                })?;
            (decoded, false)
        };

        let hash_algorithms = find_tag(&tags, "h").map(|h| {
            h.split(':')
                // Unknown hash names are ignored, not rejected.
                .filter_map(|part| HashAlgorithm::parse(part.trim()))
                .collect::<Vec<_>>()
        });

        let service_types = find_tag(&tags, "s").map(|s| {
            s.split(':')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        });

        let flags = match find_tag(&tags, "t") {
            Some(t) => t
                .split(':')
                .filter_map(|part| match part.trim() {
                    "y" => Some(KeyFlag::Testing),
                    "s" => Some(KeyFlag::Strict),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(KeyRecord {
            key_type,
            key_bytes,
            revoked,
            hash_algorithms,
            service_types,
            flags,
            notes: find_tag(&tags, "n").map(str::to_string),
        })
    }

    pub fn is_testing(&self) -> bool {
        self.flags.contains(&KeyFlag::Testing)
    }

    /// Whether the `s=` tag permits email use. Absent means `*`.
    pub fn permits_email(&self) -> bool {
        match &self.service_types {
            None => true,
            Some(types) => types.iter().any(|s| s == "email" || s == "*"),
        }
    }
}

// ── Lookup errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyLookupError {
    #[error("DNS timeout for {0}")]
    Timeout(String),
    #[error("DNS failure for {0}: {1}")]
    ServFail(String, String),
    #[error("no key record at {0}")]
    NotFound(String),
    #[error("key revoked (empty p=) at {0}")]
    Revoked(String),
    #[error("invalid key record at {0}: {1}")]
    Invalid(String, String),
}

impl KeyLookupError {
    /// Temporary errors may succeed on retry and are never cached.
    pub fn is_temporary(&self) -> bool {
        matches!(self, KeyLookupError::Timeout(_) | KeyLookupError::ServFail(..))
    }
}

// ── Resolver with cache ──────────────────────────────────────────────

#[derive(Clone)]
struct CacheEntry {
    expires: Instant,
    outcome: Result<KeyRecord, KeyLookupError>,
}

/// Key resolver with a TTL-bounded cache over the injected DNS capability.
///
/// The cache is the only shared mutable state in a verification: reads take
/// a shared lock, a resolution runs outside any lock, and the insert takes
/// the write lock briefly. Successful lookups and permanent failures are
/// cached; temporary failures are retried on the next request.
pub struct KeyResolver<R: TxtResolver> {
    resolver: R,
    cache: Arc<RwLock<HashMap<(String, String), CacheEntry>>>,
    ttl: Duration,
    timeout: Duration,
}

impl<R: TxtResolver> Clone for KeyResolver<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
            timeout: self.timeout,
        }
    }
}

impl<R: TxtResolver> KeyResolver<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(300),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the public key for `selector._domainkey.domain`.
    pub async fn resolve(
        &self,
        selector: &str,
        domain: &str,
    ) -> Result<KeyRecord, KeyLookupError> {
        let cache_key = (
            selector.to_ascii_lowercase(),
            domain.to_ascii_lowercase(),
        );

        let now = Instant::now();
        {
            let cache = self.cache.read().unwrap();
            if let Some(entry) = cache.get(&cache_key) {
                if entry.expires > now {
                    trace!(selector, domain, "key cache hit");
                    return entry.outcome.clone();
                }
            }
        }

        let query = format!("{}._domainkey.{}", selector, domain);
        debug!(%query, "resolving public key");
        let outcome = self.lookup(&query).await;

        let cacheable = match &outcome {
            Ok(_) => true,
            Err(e) => !e.is_temporary(),
        };
        if cacheable {
            let mut cache = self.cache.write().unwrap();
            cache.insert(
                cache_key,
                CacheEntry {
                    expires: now + self.ttl,
                    outcome: outcome.clone(),
                },
            );
        }
        outcome
    }

    async fn lookup(&self, query: &str) -> Result<KeyRecord, KeyLookupError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.query_txt(query));
        let records = match lookup.await {
            Err(_) => return Err(KeyLookupError::Timeout(query.to_string())),
            Ok(Err(DnsError::NxDomain)) => {
                return Err(KeyLookupError::NotFound(query.to_string()))
            }
            Ok(Err(DnsError::Timeout)) => {
                return Err(KeyLookupError::Timeout(query.to_string()))
            }
            Ok(Err(e)) => {
                return Err(KeyLookupError::ServFail(query.to_string(), e.to_string()))
            }
            Ok(Ok(records)) => records,
        };

        if records.is_empty() {
            return Err(KeyLookupError::NotFound(query.to_string()));
        }

        // A long p= value is split across TXT strings; concatenate first.
        let concatenated = records.concat();
        let record = KeyRecord::parse(&concatenated)
            .map_err(|e| KeyLookupError::Invalid(query.to_string(), e.to_string()))?;
        if record.revoked {
            return Err(KeyLookupError::Revoked(query.to_string()));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::MockResolver;

    fn rsa_stub_b64() -> String {
        BASE64.encode(vec![0x30u8; 162])
    }

    // ── record parsing ───────────────────────────────────────────────

    #[test]
    fn parse_minimal_record() {
        let key = KeyRecord::parse(&format!("p={}", rsa_stub_b64())).unwrap();
        assert_eq!(key.key_type, KeyType::Rsa);
        assert!(!key.revoked);
        assert_eq!(key.key_bytes.len(), 162);
        assert!(key.hash_algorithms.is_none());
        assert!(key.permits_email());
        assert!(!key.is_testing());
    }

    #[test]
    fn parse_full_record() {
        let input = format!(
            "v=DKIM1; k=rsa; h=sha256; s=email; t=y:s; n=rotated 2026; p={}",
            rsa_stub_b64()
        );
        let key = KeyRecord::parse(&input).unwrap();
        assert_eq!(key.hash_algorithms, Some(vec![HashAlgorithm::Sha256]));
        assert!(key.permits_email());
        assert!(key.is_testing());
        assert!(key.flags.contains(&KeyFlag::Strict));
        assert_eq!(key.notes.as_deref(), Some("rotated 2026"));
    }

    #[test]
    fn parse_revoked_record() {
        let key = KeyRecord::parse("v=DKIM1; p=").unwrap();
        assert!(key.revoked);
        assert!(key.key_bytes.is_empty());
    }

    #[test]
    fn parse_unsupported_key_type() {
        let r = KeyRecord::parse(&format!("k=dsa; p={}", rsa_stub_b64()));
        assert!(matches!(r, Err(RecordError::BadKeyType(_))));
    }

    #[test]
    fn parse_bad_version() {
        let r = KeyRecord::parse(&format!("v=DKIM2; p={}", rsa_stub_b64()));
        assert!(matches!(r, Err(RecordError::BadVersion(_))));
    }

    #[test]
    fn parse_missing_p() {
        assert_eq!(
            KeyRecord::parse("v=DKIM1; k=rsa"),
            Err(RecordError::MissingTag("p"))
        );
    }

    #[test]
    fn parse_unknown_hash_names_ignored() {
        let key =
            KeyRecord::parse(&format!("h=sha256:sha512; p={}", rsa_stub_b64())).unwrap();
        assert_eq!(key.hash_algorithms, Some(vec![HashAlgorithm::Sha256]));
    }

    #[test]
    fn parse_service_type_other_rejects_email() {
        let key = KeyRecord::parse(&format!("s=other; p={}", rsa_stub_b64())).unwrap();
        assert!(!key.permits_email());
    }

    #[test]
    fn parse_ed25519_key() {
        let p = BASE64.encode([0xABu8; 32]);
        let key = KeyRecord::parse(&format!("k=ed25519; p={}", p)).unwrap();
        assert_eq!(key.key_type, KeyType::Ed25519);
        assert_eq!(key.key_bytes.len(), 32);
    }

    // ── resolver + cache ─────────────────────────────────────────────

    fn register(resolver: &MockResolver, selector: &str, domain: &str) {
        resolver.add_txt(
            &format!("{}._domainkey.{}", selector, domain),
            vec![format!("v=DKIM1; k=rsa; p={}", rsa_stub_b64())],
        );
    }

    #[tokio::test]
    async fn resolve_parses_record() {
        let dns = MockResolver::new();
        register(&dns, "sel1", "example.com");
        let keys = KeyResolver::new(dns);
        let key = keys.resolve("sel1", "example.com").await.unwrap();
        assert_eq!(key.key_type, KeyType::Rsa);
    }

    #[tokio::test]
    async fn resolve_concatenates_txt_strings() {
        let dns = MockResolver::new();
        let p = rsa_stub_b64();
        let (front, back) = p.split_at(p.len() / 2);
        dns.add_txt(
            "sel1._domainkey.example.com",
            vec![format!("v=DKIM1; k=rsa; p={}", front), back.to_string()],
        );
        let keys = KeyResolver::new(dns);
        let key = keys.resolve("sel1", "example.com").await.unwrap();
        assert_eq!(key.key_bytes.len(), 162);
    }

    #[tokio::test]
    async fn resolve_nxdomain_is_permanent_not_found() {
        let dns = MockResolver::new();
        let keys = KeyResolver::new(dns);
        let err = keys.resolve("sel1", "absent.example").await.unwrap_err();
        assert!(matches!(err, KeyLookupError::NotFound(_)));
        assert!(!err.is_temporary());
    }

    #[tokio::test]
    async fn resolve_dns_timeout_is_temporary() {
        let dns = MockResolver::new();
        dns.add_txt_err("sel1._domainkey.example.com", DnsError::Timeout);
        let keys = KeyResolver::new(dns);
        let err = keys.resolve("sel1", "example.com").await.unwrap_err();
        assert!(err.is_temporary());
    }

    #[tokio::test]
    async fn resolve_revoked_key_is_permanent() {
        let dns = MockResolver::new();
        dns.add_txt(
            "sel1._domainkey.example.com",
            vec!["v=DKIM1; p=".to_string()],
        );
        let keys = KeyResolver::new(dns);
        let err = keys.resolve("sel1", "example.com").await.unwrap_err();
        assert!(matches!(err, KeyLookupError::Revoked(_)));
        assert!(!err.is_temporary());
    }

    #[tokio::test]
    async fn cache_deduplicates_lookups() {
        let dns = MockResolver::new();
        register(&dns, "sel1", "example.com");
        let keys = KeyResolver::new(dns.clone());
        keys.resolve("sel1", "example.com").await.unwrap();
        keys.resolve("sel1", "example.com").await.unwrap();
        keys.resolve("SEL1", "EXAMPLE.COM").await.unwrap();
        assert_eq!(dns.query_count(), 1);
    }

    #[tokio::test]
    async fn cache_keeps_permanent_failures() {
        let dns = MockResolver::new();
        let keys = KeyResolver::new(dns.clone());
        let _ = keys.resolve("sel1", "absent.example").await;
        let _ = keys.resolve("sel1", "absent.example").await;
        assert_eq!(dns.query_count(), 1);
    }

    #[tokio::test]
    async fn cache_retries_temporary_failures() {
        let dns = MockResolver::new();
        dns.add_txt_err("sel1._domainkey.example.com", DnsError::ServFail);
        let keys = KeyResolver::new(dns.clone());
        let _ = keys.resolve("sel1", "example.com").await;
        let _ = keys.resolve("sel1", "example.com").await;
        assert_eq!(dns.query_count(), 2);
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let dns = MockResolver::new();
        register(&dns, "sel1", "example.com");
        let keys = KeyResolver::new(dns.clone()).ttl(Duration::from_millis(10));
        keys.resolve("sel1", "example.com").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        keys.resolve("sel1", "example.com").await.unwrap();
        assert_eq!(dns.query_count(), 2);
    }
}
