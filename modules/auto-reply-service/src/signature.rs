//! Webhook signature verification.
//!
//! Instagram signs each delivery with HMAC-SHA256 over the raw request body
//! and sends the hex digest in `x-hub-signature-256` as `sha256=<hex>`.
//! Verification must run over the exact bytes received, never a
//! re-serialized form.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check the supplied signature header against the raw body and shared
/// secret. Comparison is constant-time.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, app_secret: &[u8]) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(app_secret).expect("HMAC can take key of any size");
    mac.update(raw_body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    expected
        .as_bytes()
        .ct_eq(signature_header.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], secret: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let secret = b"app-secret";
        assert!(verify_signature(body, &sign(body, secret), secret));
    }

    #[test]
    fn rejects_mutated_body() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let secret = b"app-secret";
        let header = sign(body, secret);
        let mut tampered = body.to_vec();
        tampered[0] ^= 0x01;
        assert!(!verify_signature(&tampered, &header, secret));
    }

    #[test]
    fn rejects_mutated_header() {
        let body = b"payload";
        let secret = b"app-secret";
        let mut header = sign(body, secret).into_bytes();
        let last = header.len() - 1;
        header[last] = if header[last] == b'0' { b'1' } else { b'0' };
        assert!(!verify_signature(
            body,
            std::str::from_utf8(&header).unwrap(),
            secret
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let header = sign(body, b"right-secret");
        assert!(!verify_signature(body, &header, b"wrong-secret"));
    }

    #[test]
    fn rejects_missing_prefix() {
        let body = b"payload";
        let secret = b"app-secret";
        let bare = sign(body, secret).trim_start_matches("sha256=").to_string();
        assert!(!verify_signature(body, &bare, secret));
    }
}
