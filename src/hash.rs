//! Digest computation: body hash check and signed-data assembly.

use ring::digest;
use subtle::ConstantTimeEq;

use crate::canon::{
    apply_body_length_limit, canonicalize_body, canonicalize_header, normalize_line_endings,
    select_signed_headers, strip_b_tag,
};
use crate::message::Header;
use crate::signature::{HashAlgorithm, SignatureRecord};

pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let alg = match algorithm {
        HashAlgorithm::Sha256 => &digest::SHA256,
        HashAlgorithm::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
    };
    digest::digest(alg, data).as_ref().to_vec()
}

/// Whether the body hashes to the signature's `bh=` value. Compared in
/// constant time.
pub fn body_hash_matches(record: &SignatureRecord, body: &[u8]) -> bool {
    let normalized = normalize_line_endings(body);
    let canonical = canonicalize_body(record.body_canon, &normalized);
    let limited = apply_body_length_limit(&canonical, record.body_length);
    let computed = digest(record.algorithm.hash_algorithm(), limited);
    computed.ct_eq(&record.body_hash).into()
}

/// Assemble the header data the signature's `b=` covers: the `h=` selection
/// followed by the signature header itself with `b=` emptied, no trailing
/// CRLF on the final line.
///
/// `own_index` is the signature header's position in `headers`; it is
/// excluded from `h=` selection even when over-signed.
pub fn signed_data(record: &SignatureRecord, headers: &[Header], own_index: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for line in select_signed_headers(
        record.header_canon,
        &record.signed_headers,
        headers,
        Some(own_index),
    ) {
        out.extend_from_slice(line.as_bytes());
    }

    let own = &headers[own_index];
    let stripped = strip_b_tag(&record.raw_value);
    out.extend_from_slice(
        canonicalize_header(record.header_canon, &own.name, &stripped).as_bytes(),
    );
    out
}
