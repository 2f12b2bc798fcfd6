use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

fn canonical_string(method: &str, path: &str, t: i64, body: &[u8]) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!("{}\n{}\n{}\n{}", method, path, t, body_hash)
}

pub(crate) fn sign(secret: &str, method: &str, path: &str, body: &[u8], t: i64) -> String {
    let message = canonical_string(method, path, t, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub(crate) fn verify(
    secret: &str,
    method: &str,
    path: &str,
    signature: &str,
    t: i64,
    body: &[u8],
    max_age_secs: i64,
) -> bool {
    let now = chrono::Utc::now().timestamp();
    if (now - t).abs() > max_age_secs {
        return false;
    }

    let expected = sign(secret, method, path, body, t);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let t = chrono::Utc::now().timestamp();
        let sig = sign("secret", "POST", "/api/notifications/broadcast", b"{}", t);
        assert!(verify("secret", "POST", "/api/notifications/broadcast", &sig, t, b"{}", 300));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let t = chrono::Utc::now().timestamp() - 301;
        let sig = sign("secret", "GET", "/x", b"", t);
        assert!(!verify("secret", "GET", "/x", &sig, t, b"", 300));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let t = chrono::Utc::now().timestamp();
        let sig = sign("secret", "POST", "/x", b"original", t);
        assert!(!verify("secret", "POST", "/x", &sig, t, b"tampered", 300));
    }
}
