//! Cryptographic primitives for the operation ledger
//!
//! This module provides domain-separated hashing and the asymmetric
//! identity layer (key derivation, signing, verification).

mod hasher;
pub mod identity;

pub use hasher::{SecureHasher, Sha256Hasher, Blake2sHasher, Keccak256Hasher, create_hasher};
pub use identity::{KeyPair, PublicKey, SignatureAlgorithm, derive_key_pair, MIN_PASSWORD_LEN};

use sha2::{Sha256, Digest};
use constant_time_eq::constant_time_eq;

/// Create a domain-separated secure hash using SHA-256
///
/// # Arguments
///
/// * `domain` - Domain prefix (e.g., "OPLEDGER_OP", "OPLEDGER_BLOCK")
/// * `data` - Data to hash
///
/// # Returns
///
/// A 32-byte secure hash with domain separation
pub fn secure_hash(domain: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // Add domain prefix for domain separation
    hasher.update(domain.as_bytes());

    // Add domain length as a single byte for additional protection
    // This prevents extension attacks even with variable-length domains
    hasher.update([domain.len() as u8]);

    // Add the actual data
    hasher.update(data);

    // Finalize and return
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Create a domain-separated secure hash of multiple inputs
///
/// # Arguments
///
/// * `domain` - Domain prefix (e.g., "OPLEDGER_OP", "OPLEDGER_BLOCK")
/// * `data` - Vector of data to hash
///
/// # Returns
///
/// A 32-byte secure hash with domain separation
pub fn secure_hash_multiple(domain: &str, data: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // Add domain prefix for domain separation
    hasher.update(domain.as_bytes());

    // Add domain length as a single byte for additional protection
    hasher.update([domain.len() as u8]);

    // Add number of elements as a protection against concatenation attacks
    hasher.update([data.len() as u8]);

    // Add each element with its length prefix
    for element in data {
        // Add a 4-byte length prefix in big-endian format
        hasher.update((element.len() as u32).to_be_bytes());

        // Add the actual data
        hasher.update(element);
    }

    // Finalize and return
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Verify a hash in constant time to prevent timing attacks
///
/// # Arguments
///
/// * `expected` - Expected hash value
/// * `actual` - Actual hash value to verify
///
/// # Returns
///
/// True if the hashes match, false otherwise
pub fn verify_hash(expected: &[u8; 32], actual: &[u8; 32]) -> bool {
    constant_time_eq(expected, actual)
}
