//! Simple and relaxed canonicalization of headers and body (RFC 6376 §3.4).

use crate::message::Header;
use crate::signature::CanonicalizationMethod;

// ── Line ending normalization ────────────────────────────────────────

/// Normalize bare LF to CRLF, leaving existing CRLF and lone CR intact.
/// Applied to the body before canonicalization.
pub fn normalize_line_endings(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\r' if input.get(i + 1) == Some(&b'\n') => {
                out.extend_from_slice(b"\r\n");
                i += 2;
            }
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

// ── Header canonicalization ──────────────────────────────────────────

/// Canonicalize one header field as `name:value`, without trailing CRLF.
/// `value` is everything after the colon, folding included.
pub fn canonicalize_header(
    method: CanonicalizationMethod,
    name: &str,
    value: &str,
) -> String {
    match method {
        // Simple: the field is reproduced verbatim.
        CanonicalizationMethod::Simple => format!("{}:{}", name, value),
        CanonicalizationMethod::Relaxed => {
            let unfolded = value.replace("\r\n", "").replace('\n', "");
            let mut collapsed = String::with_capacity(unfolded.len());
            let mut pending_space = false;
            for ch in unfolded.chars() {
                if ch == ' ' || ch == '\t' {
                    // Leading whitespace is dropped, interior runs become one SP,
                    // trailing whitespace is never flushed.
                    pending_space = !collapsed.is_empty();
                } else {
                    if pending_space {
                        collapsed.push(' ');
                        pending_space = false;
                    }
                    collapsed.push(ch);
                }
            }
            format!("{}:{}", name.to_ascii_lowercase(), collapsed)
        }
    }
}

// ── Body canonicalization ────────────────────────────────────────────

/// Canonicalize the message body. Input must already have CRLF line endings
/// (see [`normalize_line_endings`]).
pub fn canonicalize_body(method: CanonicalizationMethod, body: &[u8]) -> Vec<u8> {
    let mut lines = split_body_lines(body);

    if method == CanonicalizationMethod::Relaxed {
        lines = lines.iter().map(|l| collapse_line_whitespace(l)).collect();
    }

    while lines.last().map(|l| l.is_empty()) == Some(true) {
        lines.pop();
    }

    if lines.is_empty() {
        // Simple canonicalization of an empty body is a single CRLF;
        // relaxed is the empty string.
        return match method {
            CanonicalizationMethod::Simple => b"\r\n".to_vec(),
            CanonicalizationMethod::Relaxed => Vec::new(),
        };
    }

    let mut out = Vec::with_capacity(body.len());
    for line in &lines {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Truncate the canonicalized body to the `l=` tag limit, if any.
pub fn apply_body_length_limit(body: &[u8], limit: Option<u64>) -> &[u8] {
    match limit {
        Some(l) if (l as usize) < body.len() => &body[..l as usize],
        _ => body,
    }
}

/// Split a CRLF-terminated body into line contents (CRLF excluded).
fn split_body_lines(body: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\r' && body.get(i + 1) == Some(&b'\n') {
            lines.push(body[start..i].to_vec());
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    if start < body.len() {
        lines.push(body[start..].to_vec());
    }
    lines
}

/// Relaxed per-line rule: collapse WSP runs to one SP, drop trailing WSP.
fn collapse_line_whitespace(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut pending_space = false;
    for &b in line {
        if b == b' ' || b == b'\t' {
            pending_space = true;
        } else {
            if pending_space {
                out.push(b' ');
                pending_space = false;
            }
            out.push(b);
        }
    }
    out
}

// ── Signed-header selection ──────────────────────────────────────────

/// Canonicalize the headers named by a signature's `h=` list, in order, each
/// line CRLF-terminated.
///
/// Occurrences are consumed bottom-up: the first request for a name takes the
/// last (most recent) occurrence, the next request the one above it, and so
/// on. A name requested more often than it occurs contributes nothing, which
/// is how deployed signers over-sign a header to pin it: adding an instance
/// later shifts the consumption order and breaks the signature.
///
/// `skip` excludes one header index from selection (the signature header
/// being verified, which is appended separately with `b=` emptied).
pub fn select_signed_headers(
    method: CanonicalizationMethod,
    signed: &[String],
    headers: &[Header],
    skip: Option<usize>,
) -> Vec<String> {
    let mut consumed: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut out = Vec::with_capacity(signed.len());

    for name in signed {
        let occurrences: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| Some(*i) != skip && h.name.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
            .collect();

        let taken = consumed.entry(name.as_str()).or_insert(0);
        if *taken < occurrences.len() {
            let idx = occurrences[occurrences.len() - 1 - *taken];
            *taken += 1;
            let h = &headers[idx];
            out.push(format!(
                "{}\r\n",
                canonicalize_header(method, &h.name, &h.value)
            ));
        }
    }
    out
}

// ── b= tag stripping ─────────────────────────────────────────────────

/// Empty the `b=` tag value of a signature header value, leaving every other
/// byte (including `bh=`) untouched.
pub fn strip_b_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut first = true;
    for segment in value.split(';') {
        if !first {
            out.push(';');
        }
        first = false;
        // A segment is the b= tag when the text before its first '=' trims
        // (whitespace and fold remnants included) to exactly "b".
        let is_b = segment
            .split_once('=')
            .map(|(tag, _)| tag.trim() == "b")
            .unwrap_or(false);
        if is_b {
            let eq = segment.find('=').unwrap_or(0);
            out.push_str(&segment[..=eq]);
        } else {
            out.push_str(segment);
        }
    }
    out
}
