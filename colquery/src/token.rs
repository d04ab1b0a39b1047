use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TOKEN_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A 16-character query cache-directory token (spec §4.5): byte 0 is a
/// letter, bytes 1-15 base-64-encode `(checksum(uid) XOR hostid,
/// current_time_seconds, monotonic_counter)` so tokens are unique across
/// hosts and restartable.
pub fn generate(uid: &str, hostid: u32) -> String {
    let checksum = rapidhash::rapidhash(uid.as_bytes()) as u32;
    let salted = checksum ^ hostid;
    let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32;
    let counter = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut packed = [0u8; 11];
    packed[0..4].copy_from_slice(&salted.to_be_bytes());
    packed[4..8].copy_from_slice(&now_secs.to_be_bytes());
    packed[8..10].copy_from_slice(&(counter as u16).to_be_bytes());
    packed[10] = 0;

    let body = URL_SAFE_NO_PAD.encode(packed);
    debug_assert_eq!(body.len(), 15);
    let first = (b'a' + (salted % 26) as u8) as char;
    format!("{first}{body}")
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_token_shape() {
        let t = generate("user@example.com", 0);
        assert_eq!(t.len(), 16);
        assert!(t.chars().next().unwrap().is_ascii_lowercase());
    }

    #[test]
    fn test_tokens_are_unique_across_calls() {
        let a = generate("uid", 1);
        let b = generate("uid", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hostid_changes_first_letter_distribution() {
        let a = generate("uid", 0);
        let b = generate("uid", 0xffff_ffff);
        // Not a strict guarantee for every input, but overwhelmingly true for
        // this fixed uid/counter pair and documents the intended effect of
        // XORing in the host id.
        assert_ne!(a, b);
    }
}
