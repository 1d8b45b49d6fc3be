//! RFC 6238 TOTP: HMAC-SHA1, 30-second step, 6 digits, ±1 step of clock
//! skew tolerated on verification.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECONDS: i64 = 30;
pub const DIGITS: u32 = 6;
const SKEW_STEPS: i64 = 1;

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// 160-bit shared secret, the RFC 4226 recommended size.
pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 20];
    rand::rng().fill_bytes(&mut secret);
    secret
}

fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3).
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let bin = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    bin % 10u32.pow(DIGITS)
}

pub fn code_at(secret: &[u8], unix_time: i64) -> String {
    let counter = (unix_time / STEP_SECONDS).max(0) as u64;
    format!("{:01$}", hotp(secret, counter), DIGITS as usize)
}

/// Verify against the current step and ±1 neighbor, with a fixed clock.
pub fn verify_at(secret: &[u8], code: &str, unix_time: i64) -> bool {
    let current = unix_time / STEP_SECONDS;
    for delta in -SKEW_STEPS..=SKEW_STEPS {
        let counter = current + delta;
        if counter < 0 {
            continue;
        }
        let expected = format!("{:01$}", hotp(secret, counter as u64), DIGITS as usize);
        if expected == code {
            return true;
        }
    }
    false
}

pub fn verify(secret: &[u8], code: &str) -> bool {
    verify_at(secret, code, Utc::now().timestamp())
}

/// RFC 4648 base32 without padding, the encoding authenticator apps expect.
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

pub fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in s.bytes() {
        if c == b'=' {
            continue;
        }
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_uppercase())? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

pub fn enrollment_uri(issuer: &str, account: &str, secret_base32: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret_base32}&issuer={issuer}\
         &algorithm=SHA1&digits={DIGITS}&period={STEP_SECONDS}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B vectors, truncated to 6 digits.
    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn rfc6238_vectors() {
        assert_eq!(code_at(RFC_SECRET, 59), "287082");
        assert_eq!(code_at(RFC_SECRET, 1111111109), "081804");
        assert_eq!(code_at(RFC_SECRET, 1234567890), "005924");
    }

    #[test]
    fn window_accepts_adjacent_steps_only() {
        let t = 1_700_000_010; // mid-step
        let code = code_at(RFC_SECRET, t);

        assert!(verify_at(RFC_SECRET, &code, t));
        assert!(verify_at(RFC_SECRET, &code, t - STEP_SECONDS));
        assert!(verify_at(RFC_SECRET, &code, t + STEP_SECONDS));
        assert!(!verify_at(RFC_SECRET, &code, t + 2 * STEP_SECONDS));
        assert!(!verify_at(RFC_SECRET, &code, t - 2 * STEP_SECONDS));
    }

    #[test]
    fn wrong_code_rejected() {
        assert!(!verify_at(RFC_SECRET, "000000", 59));
        assert!(!verify_at(RFC_SECRET, "28708", 59)); // wrong length
    }

    #[test]
    fn base32_roundtrip() {
        let secret = generate_secret();
        let encoded = base32_encode(&secret);
        assert_eq!(base32_decode(&encoded).unwrap(), secret);
    }

    #[test]
    fn base32_rejects_invalid_chars() {
        assert!(base32_decode("AB1!").is_none()); // '1' and '!' not in alphabet
    }

    #[test]
    fn enrollment_uri_shape() {
        let uri = enrollment_uri("cachet", "alice", "JBSWY3DP");
        assert!(uri.starts_with("otpauth://totp/cachet:alice?secret=JBSWY3DP"));
        assert!(uri.contains("period=30"));
    }
}
