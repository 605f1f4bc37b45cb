//! Pairing code generation and verification.
//!
//! A pairing code is six uppercase alphanumeric characters, drawn from
//! `ring::rand::SystemRandom` (already a workspace dependency for the
//! Control Plane's TLS stack) rather than pulling in a dedicated `rand`
//! crate. Only the SHA-256 hash is retained once a code is issued.

use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

const CODE_LEN: usize = 6;
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789"; // no 0/O/1/I

/// Generate a fresh, human-typeable pairing code.
pub fn generate_code() -> String {
    let rng = SystemRandom::new();
    let mut buf = [0u8; CODE_LEN];
    rng.fill(&mut buf).expect("system RNG unavailable");
    buf.iter().map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char).collect()
}

/// Hex-encoded SHA-256 of a pairing code, for at-rest storage.
pub fn hash_code(code: &str) -> String {
    let digest = digest(&SHA256, code.trim().to_uppercase().as_bytes());
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

pub fn verify_code(code: &str, expected_hash: &str) -> bool {
    constant_time_eq(hash_code(code).as_bytes(), expected_hash.as_bytes())
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
    fn generated_code_has_expected_length() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LEN);
    }

    #[test]
    fn correct_code_verifies() {
        let code = generate_code();
        let hash = hash_code(&code);
        assert!(verify_code(&code, &hash));
    }

    #[test]
    fn wrong_code_does_not_verify() {
        let hash = hash_code("ABCDEF");
        assert!(!verify_code("ZZZZZZ", &hash));
    }

    #[test]
    fn verification_is_case_insensitive() {
        let hash = hash_code("ABC234");
        assert!(verify_code("abc234", &hash));
    }
}
