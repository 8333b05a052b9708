//! Message decomposition: raw bytes → ordered headers + body.
//!
//! Headers keep their original casing, folding and byte content; nothing is
//! normalized at this stage. Canonicalization happens later, per signature.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("no header/body boundary found")]
    MissingBoundary,
    #[error("unparseable header field at line {0}")]
    InvalidHeaderLine(usize),
    #[error("header section is not valid UTF-8")]
    InvalidEncoding,
}

/// A single header field, folding preserved.
///
/// `value` is everything after the colon, including leading whitespace and
/// the CRLFs of any continuation lines. `raw` is the original field bytes
/// (name, colon and folded value) without the terminating CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    pub raw: String,
}

impl Header {
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A decomposed message. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct Message {
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl Message {
    /// Split raw message bytes at the first blank line (CRLF CRLF or LF LF)
    /// into headers and body.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        let (header_bytes, body) = split_at_boundary(raw)?;

        // RFC 5322 header fields are 7-bit ASCII.
        let section =
            std::str::from_utf8(header_bytes).map_err(|_| MessageError::InvalidEncoding)?;

        let headers = parse_header_section(section)?;
        Ok(Message {
            headers,
            body: body.to_vec(),
        })
    }

    /// Indices of all headers with the given name, in message order.
    pub fn find_all(&self, name: &str) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_named(name))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h.is_named(name))
    }
}

fn split_at_boundary(raw: &[u8]) -> Result<(&[u8], &[u8]), MessageError> {
    if let Some(pos) = find_subslice(raw, b"\r\n\r\n") {
        return Ok((&raw[..pos], &raw[pos + 4..]));
    }
    // Tolerate bare-LF messages; the boundary is then LF LF.
    if let Some(pos) = find_subslice(raw, b"\n\n") {
        return Ok((&raw[..pos], &raw[pos + 2..]));
    }
    Err(MessageError::MissingBoundary)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_header_section(section: &str) -> Result<Vec<Header>, MessageError> {
    let mut headers: Vec<Header> = Vec::new();

    for (line_no, line) in split_lines(section).into_iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation line: belongs to the previous header field.
            let prev = headers
                .last_mut()
                .ok_or(MessageError::InvalidHeaderLine(line_no + 1))?;
            prev.value.push_str("\r\n");
            prev.value.push_str(line);
            prev.raw.push_str("\r\n");
            prev.raw.push_str(line);
        } else {
            let colon = line
                .find(':')
                .ok_or(MessageError::InvalidHeaderLine(line_no + 1))?;
            headers.push(Header {
                name: line[..colon].to_string(),
                value: line[colon + 1..].to_string(),
                raw: line.to_string(),
            });
        }
    }

    Ok(headers)
}

/// Split a header section into lines, handling both CRLF and bare LF.
fn split_lines(section: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = section.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
            lines.push(&section[start..i]);
            i += 2;
            start = i;
        } else if bytes[i] == b'\n' {
            lines.push(&section[start..i]);
            i += 1;
            start = i;
        } else {
            i += 1;
        }
    }
    if start < bytes.len() {
        lines.push(&section[start..]);
    }
    lines
}
