//! Password-reset secrets: generated once, transmitted out-of-band, and
//! stored only as a one-way hash with a short expiry.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

const SECRET_LEN: usize = 32;

/// Fixed validity window for an outstanding reset secret.
pub const RESET_TOKEN_TTL_SECS: i64 = 10 * 60;

/// A freshly generated reset secret. `raw` leaves the process exactly once,
/// inside the reset email; only `hash` and `expires_at` are persisted.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub raw: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

pub fn generate() -> ResetToken {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let hash = hash_candidate(&raw);

    ResetToken {
        raw,
        hash,
        expires_at: Utc::now() + Duration::seconds(RESET_TOKEN_TTL_SECS),
    }
}

/// Recompute the stored form of a candidate secret for lookup. The record
/// holding this hash (with an unexpired window) is the one the secret
/// belongs to; no other comparison is needed.
pub fn hash_candidate(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_secret_has_full_entropy_length() {
        let token = generate();
        // 32 random bytes, hex encoded.
        assert_eq!(token.raw.len(), 64);
        assert!(token.raw.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stored_hash_matches_recomputed_candidate() {
        let token = generate();
        assert_eq!(token.hash, hash_candidate(&token.raw));
        assert_ne!(token.hash, token.raw);
    }

    #[test]
    fn generated_secrets_are_unique() {
        assert_ne!(generate().raw, generate().raw);
    }

    #[test]
    fn expiry_is_ten_minutes_out() {
        let token = generate();
        let window = token.expires_at - Utc::now();
        assert!(window <= Duration::minutes(10));
        assert!(window > Duration::minutes(9));
    }
}
