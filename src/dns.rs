//! Injected DNS capability: the engine consumes TXT lookups through the
//! [`TxtResolver`] trait and never talks to the network itself.
//!
//! [`HickoryResolver`] is the production implementation; [`MockResolver`]
//! serves deterministic tests with no network access.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("NXDOMAIN: name does not exist")]
    NxDomain,
    #[error("DNS timeout")]
    Timeout,
    #[error("SERVFAIL: server failure")]
    ServFail,
    #[error("DNS error: {0}")]
    Other(String),
}

impl DnsError {
    /// Whether a retry might succeed. NXDOMAIN is authoritative; everything
    /// else is treated as transient.
    pub fn is_temporary(&self) -> bool {
        !matches!(self, DnsError::NxDomain)
    }
}

/// TXT lookup capability consumed by the key resolver.
pub trait TxtResolver: Clone + Send + Sync + 'static {
    fn query_txt(&self, name: &str)
        -> impl Future<Output = Result<Vec<String>, DnsError>> + Send;
}

// ── Production resolver ──────────────────────────────────────────────

/// [`TxtResolver`] backed by hickory-dns.
#[derive(Clone)]
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();
        Self { resolver }
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let resolver =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();
        Self { resolver }
    }

    fn classify_error(e: &hickory_resolver::ResolveError) -> DnsError {
        let msg = e.to_string().to_lowercase();
        if msg.contains("nxdomain") || msg.contains("no records") {
            DnsError::NxDomain
        } else if msg.contains("timeout") {
            DnsError::Timeout
        } else if msg.contains("servfail") {
            DnsError::ServFail
        } else {
            DnsError::Other(e.to_string())
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TxtResolver for HickoryResolver {
    async fn query_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|txt| txt.to_string()).collect()),
            Err(e) => Err(Self::classify_error(&e)),
        }
    }
}

// ── Mock resolver ────────────────────────────────────────────────────

/// In-memory [`TxtResolver`] for tests: fixed records, injected errors, and a
/// query counter for asserting cache behavior.
#[derive(Clone, Default)]
pub struct MockResolver {
    txt_records: Arc<Mutex<HashMap<String, Vec<String>>>>,
    errors: Arc<Mutex<HashMap<String, DnsError>>>,
    queries: Arc<Mutex<u32>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_txt(&self, name: &str, records: Vec<String>) {
        self.txt_records
            .lock()
            .unwrap()
            .insert(name.to_ascii_lowercase(), records);
    }

    pub fn add_txt_err(&self, name: &str, error: DnsError) {
        self.errors
            .lock()
            .unwrap()
            .insert(name.to_ascii_lowercase(), error);
    }

    pub fn set_nxdomain(&self, name: &str) {
        self.add_txt_err(name, DnsError::NxDomain);
    }

    /// Total TXT queries issued so far.
    pub fn query_count(&self) -> u32 {
        *self.queries.lock().unwrap()
    }
}

impl TxtResolver for MockResolver {
    async fn query_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        *self.queries.lock().unwrap() += 1;
        let key = name.to_ascii_lowercase();
        if let Some(err) = self.errors.lock().unwrap().get(&key) {
            return Err(err.clone());
        }
        match self.txt_records.lock().unwrap().get(&key) {
            Some(records) => Ok(records.clone()),
            None => Err(DnsError::NxDomain),
        }
    }
}
