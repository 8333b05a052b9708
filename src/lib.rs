//! DKIM and ARC signature verification for email messages.
//!
//! [`Verifier`] takes raw message bytes and produces a structured
//! [`VerificationResult`]: the ARC chain is evaluated first when present,
//! and DKIM signatures serve as the fallback verdict. DNS is injected
//! through the [`TxtResolver`] trait, so the engine itself never opens a
//! socket.
//!
//! ```no_run
//! use mailsig::{HickoryResolver, Verifier};
//!
//! # async fn demo(raw: &[u8]) -> Result<(), mailsig::MessageError> {
//! let verifier = Verifier::new(HickoryResolver::new());
//! let result = verifier.verify(raw).await?;
//! println!("verified: {} via {:?}", result.verified, result.method);
//! # Ok(())
//! # }
//! ```

pub mod arc;
pub mod canon;
pub mod crypto;
pub mod dkim;
pub mod dns;
pub mod hash;
pub mod key;
pub mod message;
pub mod result;
pub mod signature;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

pub use arc::{ChainError, ChainEvaluation};
pub use dns::{DnsError, HickoryResolver, MockResolver, TxtResolver};
pub use key::{KeyLookupError, KeyRecord, KeyResolver};
pub use message::{Message, MessageError};
pub use result::{Method, Outcome, SignatureReport, VerificationResult};
pub use signature::{Algorithm, CanonicalizationMethod, ChainStatus, SignatureRecord};

/// Default tolerance for clock disagreement when checking `x=` expiry.
pub const DEFAULT_CLOCK_SKEW: u64 = 300;

/// Verification engine: message parsing, ARC chain walk, DKIM fallback.
///
/// Cloning is cheap and clones share the key cache.
#[derive(Clone)]
pub struct Verifier<R: TxtResolver> {
    keys: KeyResolver<R>,
    clock_skew: u64,
    max_parallelism: usize,
}

impl<R: TxtResolver> Verifier<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            keys: KeyResolver::new(resolver),
            clock_skew: DEFAULT_CLOCK_SKEW,
            max_parallelism: 8,
        }
    }

    /// Allowed clock skew in seconds for signature expiry.
    pub fn clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew = seconds;
        self
    }

    /// Timeout for a single DNS key lookup.
    pub fn dns_timeout(mut self, timeout: Duration) -> Self {
        self.keys = self.keys.timeout(timeout);
        self
    }

    /// How long resolved keys (and permanent lookup failures) stay cached.
    pub fn key_ttl(mut self, ttl: Duration) -> Self {
        self.keys = self.keys.ttl(ttl);
        self
    }

    /// Upper bound on concurrent DNS lookups during key prefetch.
    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n.max(1);
        self
    }

    /// Verify every signature on the message.
    ///
    /// Only an unparseable message is an error; individual signature
    /// failures land in the result's reports.
    pub async fn verify(&self, raw: &[u8]) -> Result<VerificationResult, MessageError> {
        let msg = Message::parse(raw)?;
        self.prefetch_keys(&msg).await;

        let mut reports = Vec::new();
        let has_arc = msg.has_header(arc::ARC_SEAL)
            || msg.has_header(arc::ARC_MESSAGE_SIGNATURE)
            || msg.has_header(arc::ARC_AUTHENTICATION_RESULTS);

        if has_arc {
            match arc::validate_chain(&self.keys, &msg, self.clock_skew).await {
                Ok(eval) if eval.status == ChainStatus::Pass => {
                    debug!("ARC chain passed");
                    return Ok(VerificationResult {
                        verified: true,
                        method: Some(Method::Arc),
                        reports: eval.reports,
                        diagnostic: None,
                    });
                }
                Ok(eval) => reports.extend(eval.reports),
                Err(e @ ChainError::Order(_)) => reports.push(SignatureReport {
                    domain: String::new(),
                    selector: String::new(),
                    instance: None,
                    outcome: Outcome::PermError,
                    reason: e.to_string(),
                }),
            }
        }

        let dkim_reports = dkim::verify_signatures(&self.keys, &msg, self.clock_skew).await;
        let dkim_passed = dkim_reports.iter().any(|r| r.passed());
        reports.extend(dkim_reports);

        if reports.is_empty() {
            return Ok(VerificationResult {
                verified: false,
                method: None,
                reports,
                diagnostic: Some("no signatures present".to_string()),
            });
        }

        Ok(VerificationResult {
            verified: dkim_passed,
            method: dkim_passed.then_some(Method::Dkim),
            reports,
            diagnostic: None,
        })
    }

    /// Warm the key cache: resolve every `(selector, domain)` pair named by a
    /// signature header, concurrently but bounded. Outcomes are ignored here;
    /// the sequential verification re-reads them from the cache.
    async fn prefetch_keys(&self, msg: &Message) {
        let mut pairs: HashSet<(String, String)> = HashSet::new();
        for header in &msg.headers {
            let is_sig = header.is_named(dkim::DKIM_SIGNATURE)
                || header.is_named(arc::ARC_MESSAGE_SIGNATURE)
                || header.is_named(arc::ARC_SEAL);
            if !is_sig {
                continue;
            }
            let selector = dkim::lenient_tag(&header.value, "s");
            let domain = dkim::lenient_tag(&header.value, "d");
            if let (Some(s), Some(d)) = (selector, domain) {
                pairs.insert((s, d.to_ascii_lowercase()));
            }
        }
        if pairs.len() < 2 {
            return;
        }
        debug!(keys = pairs.len(), "prefetching public keys");

        let limit = Arc::new(Semaphore::new(self.max_parallelism));
        let mut tasks = JoinSet::new();
        for (selector, domain) in pairs {
            let keys = self.keys.clone();
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = limit.acquire().await.ok();
                let _ = keys.resolve(&selector, &domain).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
