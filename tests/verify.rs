//! End-to-end verification against in-memory DNS, exercising the public API
//! the way a mail filter would.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, RsaKeyPair, RSA_PKCS1_SHA256};

use mailsig::canon::{canonicalize_body, canonicalize_header, normalize_line_endings};
use mailsig::hash::digest;
use mailsig::signature::HashAlgorithm;
use mailsig::{
    CanonicalizationMethod, Method, MockResolver, Outcome, Verifier,
};

/// 2048-bit RSA test key, PKCS#8 DER. Generated once for these tests; the
/// matching SPKI public half is below.
const RSA_PKCS8_B64: &str = "MIIEvAIBADANBgkqhkiG9w0BAQEFAASCBKYwggSiAgEAAoIBAQC4EO94skJpq89cM9BTPpwNv0UIQb0NeNETxhsV/TrjFhkqI57GvRS96DBc2lbVSR1agwTEVa5ioqLeDWrvi4TN+n+L9aGH4R5vogrzlcNDDcP18Q+LjvkKTbN+tXrd3OgkVOk3r5ppWs6gTUsARB18Cd+AtsHQc3WYPXPV5ETqxIcq/YmdwtQZBY/QabJhyZQ8e6fSM8mYqYGmKS0+tb314B0UFf7Rp3j5btHEZPDgGClaJYm3bNzF6I+OmX9u83GEntfb1+pmDXqz0GLHjddzzxexy9gVPuvqRp1cWlt3mvTCwJhLA15+rWLabxu2YWG4aeuHfl4Iyq/mi8UUDozFAgMBAAECggEARfyygWsOU42vZ7iP0scwoQ2EGxKb5r50iRc/f0ntFSF26g3nNlv4wgjCMtwWPjzxu1OsAVcu2nRKhzIE4hZjpcpEqxv3kmnnn7y2e04Lk7htNVu2dHMlgGRxBpHMqQVxAzeCAdl0VfDgNhWNmglMSLicUh2rbi4onX1oSQDlr3nrbb0KlZ2dwHe31Rf0cx31NM0dJ8vh4ujHzKBJbP9QpgMsWU3K1ccM6X8bcUqOnyGNJGl6yELhQezd8AfiYTb6SKvEfgm7w9W7yCaYmv1pM7J+17sNPjp7m+ImWnwtEuTtXmpY4kV13zy1zHKWh0f+BYGX16+HY/eBXDGIRjJO9QKBgQDcr0+zuKetIn7ukeqU8cJ2RdMH7qQSMADmwXJPYw63C8aZb6BdtZXHYqYAVBR+55p8cz54+AkGs8yN3q/gc+m6dSa6YI2jfFGCnNBViboWAPh4qsvVRKueJKfYsZQ4cjeL/qa/FIMiJAaQ1zCMdYFYURSHV6O8SrhCptYuYobQ1wKBgQDVhXw2VXPg+GFqvGsbeYQhHA94iwvfUpr0cQQEuq2InH9B06yPJWX/3aY9JmiBkZeHy5RdDMrZ9L9AIRW9lW51xv2axC1ByoTWGMNpOPUcbX01DltXPNvQdwWSEIvEvgz086YOIm8EKY9V09wpjJq9hSFKvLUNJQLpJdT/4movwwKBgHHTbs2pIbtYfpX450D5za6JZ0bBHRlQbzaWcqpl0nIxfbcob1PGVEHqLOsgcw3d0b39By0H6kftt0U5pgekYdrNkDMzl/rKJZSz43UrO7Mbvw0mM0qGR+qix3wqY+QVbXck2sbWAqk6YbSVebII7bUq5ObGGmsFMzMVsIVuRlEzAoGANk7eWf+AGr9yH7DO2U0eA0Hc2X8cRPAAw52fNQi6LJ4JbBfHsx0DBYI9zx3exN3gGcT49nXTfn5WypvfqLnCP6ieRmgRTsOQ59eilDfNeC6NAxqkttqe2jX7r7wPoLnqF7+FA+FUNU3QzDa3r8W4ce3TmuvGbRJ13BEoTPEsqvsCgYAltP3jfeID+RNjitBpD9F0Lnh/SzpfczlsEqXoG8VaoxnR1RCUhQg1DktP07fo50unSeVR/zqON5xXmXeCGvaEjATz8FhhZD/T63YSmIwSDGQabyhr2O7Mn2j+gbJW0oTRP4EAknAcKv1szmODdnuy+c5TEfRcCRHo9ewyNXy/kQ==";

const RSA_SPKI_B64: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAuBDveLJCaavPXDPQUz6cDb9FCEG9DXjRE8YbFf064xYZKiOexr0UvegwXNpW1UkdWoMExFWuYqKi3g1q74uEzfp/i/Whh+Eeb6IK85XDQw3D9fEPi475Ck2zfrV63dzoJFTpN6+aaVrOoE1LAEQdfAnfgLbB0HN1mD1z1eRE6sSHKv2JncLUGQWP0GmyYcmUPHun0jPJmKmBpiktPrW99eAdFBX+0ad4+W7RxGTw4BgpWiWJt2zcxeiPjpl/bvNxhJ7X29fqZg16s9Bix43Xc88XscvYFT7r6kadXFpbd5r0wsCYSwNefq1i2m8btmFhuGnrh35eCMqv5ovFFA6MxQIDAQAB";

const HEADERS: [(&str, &str); 4] = [
    ("From", " sender@example.org"),
    ("To", " rcpt@example.net"),
    ("Subject", " quarterly report"),
    ("Date", " Tue, 25 Aug 2026 10:00:00 +0000"),
];

const BODY: &str = "Please find the report attached.\r\n\r\nRegards,\r\nSender\r\n";

fn relax(name: &str, value: &str) -> String {
    canonicalize_header(CanonicalizationMethod::Relaxed, name, value)
}

/// Build an RSA-SHA256 signed message, c=relaxed/simple over
/// from/to/subject/date, and publish its key in the mock DNS.
fn rsa_signed_message(dns: &MockResolver) -> Vec<u8> {
    let pkcs8 = BASE64.decode(RSA_PKCS8_B64).unwrap();
    let pair = RsaKeyPair::from_pkcs8(&pkcs8).unwrap();
    dns.add_txt(
        "rsa1._domainkey.example.org",
        vec![format!("v=DKIM1; k=rsa; p={}", RSA_SPKI_B64)],
    );

    let bh = BASE64.encode(digest(
        HashAlgorithm::Sha256,
        &canonicalize_body(
            CanonicalizationMethod::Simple,
            &normalize_line_endings(BODY.as_bytes()),
        ),
    ));
    let unsigned = format!(
        " v=1; a=rsa-sha256; c=relaxed/simple; d=example.org; s=rsa1; \
         h=from:to:subject:date; bh={}; b=",
        bh
    );

    let mut data = Vec::new();
    for (name, value) in HEADERS {
        data.extend_from_slice(relax(name, value).as_bytes());
        data.extend_from_slice(b"\r\n");
    }
    data.extend_from_slice(relax("DKIM-Signature", &unsigned).as_bytes());

    let rng = SystemRandom::new();
    let mut sig = vec![0u8; pair.public().modulus_len()];
    pair.sign(&RSA_PKCS1_SHA256, &rng, &data, &mut sig).unwrap();
    let value = format!("{}{}", unsigned, BASE64.encode(&sig));

    let mut raw = String::new();
    for (name, v) in HEADERS {
        raw.push_str(&format!("{}:{}\r\n", name, v));
    }
    raw.push_str(&format!("DKIM-Signature:{}\r\n\r\n{}", value, BODY));
    raw.into_bytes()
}

#[tokio::test]
async fn rsa_signed_message_verifies() {
    let dns = MockResolver::new();
    let raw = rsa_signed_message(&dns);

    let result = Verifier::new(dns).verify(&raw).await.unwrap();
    assert!(result.verified);
    assert_eq!(result.method, Some(Method::Dkim));
    assert_eq!(result.reports.len(), 1);
    assert_eq!(result.reports[0].outcome, Outcome::Pass);
    assert_eq!(result.reports[0].domain, "example.org");
}

#[tokio::test]
async fn mutated_subject_breaks_rsa_signature() {
    let dns = MockResolver::new();
    let raw = rsa_signed_message(&dns);
    let text = String::from_utf8(raw)
        .unwrap()
        .replace("quarterly report", "URGENT!!!");

    let result = Verifier::new(dns).verify(text.as_bytes()).await.unwrap();
    assert!(!result.verified);
    assert_eq!(result.reports[0].outcome, Outcome::Fail);
    assert!(result.reports[0].reason.contains("signature"));
}

#[tokio::test]
async fn appended_body_breaks_body_hash() {
    let dns = MockResolver::new();
    let mut raw = rsa_signed_message(&dns);
    raw.extend_from_slice(b"injected footer\r\n");

    let result = Verifier::new(dns).verify(&raw).await.unwrap();
    assert!(!result.verified);
    assert_eq!(result.reports[0].outcome, Outcome::Fail);
    assert!(result.reports[0].reason.contains("body hash"));
}

#[tokio::test]
async fn unknown_selector_is_permanent_error() {
    let dns = MockResolver::new();
    let raw = rsa_signed_message(&dns);
    let text = String::from_utf8(raw).unwrap().replace("s=rsa1", "s=gone");

    let result = Verifier::new(dns).verify(text.as_bytes()).await.unwrap();
    assert!(!result.verified);
    assert_eq!(result.reports[0].outcome, Outcome::PermError);
}

#[tokio::test]
async fn message_without_signatures_reports_diagnostic() {
    let raw = b"From: a@b.c\r\nSubject: hi\r\n\r\nplain message";
    let result = Verifier::new(MockResolver::new()).verify(raw).await.unwrap();
    assert!(!result.verified);
    assert!(result.reports.is_empty());
    assert_eq!(result.diagnostic.as_deref(), Some("no signatures present"));
}

// ── ARC end to end ───────────────────────────────────────────────────

/// One ARC set sealed with Ed25519 over the same base message.
fn arc_sealed_message(dns: &MockResolver) -> Vec<u8> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
    dns.add_txt(
        "arcsel._domainkey.relay.example",
        vec![format!(
            "v=DKIM1; k=ed25519; p={}",
            BASE64.encode(pair.public_key().as_ref())
        )],
    );

    let aar = " i=1; relay.example; spf=pass";

    let bh = BASE64.encode(digest(
        HashAlgorithm::Sha256,
        &canonicalize_body(
            CanonicalizationMethod::Relaxed,
            &normalize_line_endings(BODY.as_bytes()),
        ),
    ));
    let ams_unsigned = format!(
        " i=1; a=ed25519-sha256; d=relay.example; s=arcsel; h=from:to:subject; bh={}; b=",
        bh
    );
    let mut ams_data = Vec::new();
    for (name, value) in &HEADERS[..3] {
        ams_data.extend_from_slice(relax(name, value).as_bytes());
        ams_data.extend_from_slice(b"\r\n");
    }
    ams_data.extend_from_slice(relax("ARC-Message-Signature", &ams_unsigned).as_bytes());
    let ams = format!(
        "{}{}",
        ams_unsigned,
        BASE64.encode(pair.sign(&ams_data).as_ref())
    );

    let seal_unsigned =
        " i=1; cv=none; a=ed25519-sha256; d=relay.example; s=arcsel; b=".to_string();
    let mut seal_data = Vec::new();
    seal_data.extend_from_slice(relax("ARC-Authentication-Results", aar).as_bytes());
    seal_data.extend_from_slice(b"\r\n");
    seal_data.extend_from_slice(relax("ARC-Message-Signature", &ams).as_bytes());
    seal_data.extend_from_slice(b"\r\n");
    seal_data.extend_from_slice(relax("ARC-Seal", &seal_unsigned).as_bytes());
    let seal = format!(
        "{}{}",
        seal_unsigned,
        BASE64.encode(pair.sign(&seal_data).as_ref())
    );

    let mut raw = String::new();
    raw.push_str(&format!("ARC-Seal:{}\r\n", seal));
    raw.push_str(&format!("ARC-Message-Signature:{}\r\n", ams));
    raw.push_str(&format!("ARC-Authentication-Results:{}\r\n", aar));
    for (name, v) in HEADERS {
        raw.push_str(&format!("{}:{}\r\n", name, v));
    }
    raw.push_str(&format!("\r\n{}", BODY));
    raw.into_bytes()
}

#[tokio::test]
async fn arc_chain_verifies_without_dkim() {
    let dns = MockResolver::new();
    let raw = arc_sealed_message(&dns);

    let result = Verifier::new(dns).verify(&raw).await.unwrap();
    assert!(result.verified);
    assert_eq!(result.method, Some(Method::Arc));
    assert_eq!(result.reports.len(), 1);
    assert_eq!(result.reports[0].instance, Some(1));
}

#[tokio::test]
async fn failed_arc_chain_falls_back_to_dkim() {
    let dns = MockResolver::new();
    let arc_raw = arc_sealed_message(&dns);
    let dkim_raw = rsa_signed_message(&dns);

    // Splice the DKIM signature into the ARC message, then break the seal.
    let dkim_text = String::from_utf8(dkim_raw).unwrap();
    let sig_line = dkim_text
        .lines()
        .find(|l| l.starts_with("DKIM-Signature"))
        .unwrap();
    let text = String::from_utf8(arc_raw)
        .unwrap()
        .replacen("cv=none", "cv=pass", 1)
        .replacen(
            "ARC-Authentication-Results:",
            &format!("{}\r\nARC-Authentication-Results:", sig_line),
            1,
        );

    let result = Verifier::new(dns).verify(text.as_bytes()).await.unwrap();
    assert!(result.verified);
    assert_eq!(result.method, Some(Method::Dkim));
    // Both the failed ARC instance and the passing DKIM signature appear.
    assert_eq!(result.reports.len(), 2);
    assert_eq!(result.reports[0].outcome, Outcome::Fail);
    assert!(result.reports[0].reason.contains("cv mismatch"));
    assert_eq!(result.reports[1].outcome, Outcome::Pass);
}
