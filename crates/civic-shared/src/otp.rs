//! One-time code generation and at-rest hashing.
//!
//! Codes are six decimal digits. The store never sees the plaintext code:
//! it keeps a BLAKE3 hash bound to the phone number, and verification
//! compares hashes in constant time.

use rand::Rng;
use subtle::ConstantTimeEq;

use crate::constants::{KDF_CONTEXT_OTP, OTP_CODE_MAX, OTP_CODE_MIN};

/// Draw a fresh code uniformly from `[100000, 999999]`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(OTP_CODE_MIN..=OTP_CODE_MAX).to_string()
}

/// Draw a code whose hash differs from `previous_hash`.
pub fn generate_code_excluding<R: Rng + ?Sized>(
    rng: &mut R,
    previous_hash: Option<&str>,
    phone: &str,
) -> String {
    loop {
        let code = generate_code(rng);
        match previous_hash {
            Some(prev) if code_matches(phone, &code, prev) => continue,
            _ => return code,
        }
    }
}

/// Hex-encoded BLAKE3 hash of `code`, domain-separated and bound to `phone`.
pub fn hash_code(phone: &str, code: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_OTP);
    hasher.update(phone.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Constant-time check of a submitted code against a stored hash.
pub fn code_matches(phone: &str, submitted: &str, stored_hash: &str) -> bool {
    let candidate = hash_code(phone, submitted);
    let a = candidate.as_bytes();
    let b = stored_hash.as_bytes();
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}
