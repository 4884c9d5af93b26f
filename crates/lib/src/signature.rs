//! Inbound request signature check.
//!
//! The provider signs each outgoing-robot request with
//! `base64(HMAC-SHA256(key = secret, "{timestamp}\n{secret}"))` and sends the timestamp and the
//! signature as headers.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the signature for `timestamp` under `secret`.
pub fn sign(timestamp: &str, secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(format!("{}\n{}", timestamp, secret).as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Returns true if `signature` matches `timestamp` under `secret`.
/// An empty secret disables the check and always returns true.
pub fn verify(timestamp: &str, signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }
    constant_time_eq(sign(timestamp, secret).as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(timestamp: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}\n{}", timestamp, secret).as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_correct_signature() {
        let sig = reference("1000", "abc");
        assert_eq!(sign("1000", "abc"), sig);
        assert!(verify("1000", &sig, "abc"));
    }

    #[test]
    fn rejects_other_signatures() {
        let sig = reference("1000", "abc");
        assert!(!verify("1000", "not-a-signature", "abc"));
        assert!(!verify("1001", &sig, "abc"));
        assert!(!verify("1000", &sig, "abd"));
        assert!(!verify("1000", &sig[..sig.len() - 1], "abc"));
    }

    #[test]
    fn rejects_empty_inputs_when_secret_set() {
        assert!(!verify("", "", "abc"));
        assert!(!verify("1000", "", "abc"));
        assert!(!verify("", &reference("", "abc"), "abc"));
    }

    #[test]
    fn empty_secret_accepts_anything() {
        assert!(verify("1000", "", ""));
        assert!(verify("", "", ""));
        assert!(verify("1000", "garbage", ""));
    }

    #[test]
    fn signature_is_padded_base64_of_sha256() {
        let sig = sign("1000", "abc");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(sig.as_bytes())
            .unwrap();
        assert_eq!(raw.len(), 32);
    }
}
