//! Structured verification outcome reported to the caller.

/// Which mechanism produced the overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Arc,
    Dkim,
}

/// Outcome for one signature or ARC instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    /// Cryptographic or hash mismatch; retrying cannot help.
    Fail,
    /// DNS trouble; a retry may succeed.
    TempError,
    /// Malformed record, missing key, revoked key, policy violation.
    PermError,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pass => write!(f, "pass"),
            Outcome::Fail => write!(f, "fail"),
            Outcome::TempError => write!(f, "temperror"),
            Outcome::PermError => write!(f, "permerror"),
        }
    }
}

/// Per-signature detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReport {
    pub domain: String,
    pub selector: String,
    /// ARC instance number, absent for DKIM signatures.
    pub instance: Option<u32>,
    pub outcome: Outcome,
    pub reason: String,
}

impl SignatureReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Overall result of verifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// True when the ARC chain validated or at least one DKIM signature
    /// passed.
    pub verified: bool,
    /// Mechanism behind `verified`; `None` when nothing passed.
    pub method: Option<Method>,
    pub reports: Vec<SignatureReport>,
    /// Human-readable note when no verdict could be produced, e.g. a message
    /// carrying no signatures at all.
    pub diagnostic: Option<String>,
}
