use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `timestamp.body`, hex encoded.
///
/// Used to sign outbound webhook-style calls so the receiver can check both
/// origin and freshness.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature produced by [`sign_payload`] in constant time.
pub fn verify_payload(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_payload(secret, timestamp, body)?;
    Ok(secrets_match(&expected, signature))
}

/// Constant-time string equality for shared secrets and bearer tokens.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();

    if expected.len() != provided.len() {
        return false;
    }

    expected.ct_eq(provided).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "realtime-secret";
    const BODY: &[u8] = br#"{"channel":"conversation-42","event":"new-message"}"#;

    #[test]
    fn signed_payload_verifies() {
        let signature = sign_payload(SECRET, 1_760_000_000, BODY).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_payload(SECRET, 1_760_000_000, BODY, &signature).unwrap());
    }

    #[test]
    fn stale_timestamp_fails_verification() {
        let signature = sign_payload(SECRET, 1_760_000_000, BODY).unwrap();
        assert!(!verify_payload(SECRET, 1_760_000_001, BODY, &signature).unwrap());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let signature = sign_payload(SECRET, 1_760_000_000, BODY).unwrap();
        let tampered = br#"{"channel":"conversation-43","event":"new-message"}"#;
        assert!(!verify_payload(SECRET, 1_760_000_000, tampered, &signature).unwrap());
    }

    #[test]
    fn secrets_match_rejects_prefixes() {
        assert!(secrets_match("cron-secret", "cron-secret"));
        assert!(!secrets_match("cron-secret", "cron-secre"));
        assert!(!secrets_match("cron-secret", ""));
    }
}
