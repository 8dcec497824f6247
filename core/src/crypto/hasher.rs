//! Secure hasher implementation with domain separation
//!
//! This module provides a trait for secure hasher implementations
//! and concrete implementations using different hash algorithms,
//! selected by the configured [`HashAlgorithm`]. Chain content hashing
//! pins SHA-256; mixing algorithms inside one ledger is a defect.

use sha2::{Sha256, Digest};
use blake2::Blake2s256;
use sha3::Keccak256;
use std::fmt::Debug;

use crate::config::HashAlgorithm;

/// SecureHasher trait for domain-separated hashing
pub trait SecureHasher: Debug + Send + Sync + 'static {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize the hash and return the result
    fn finalize(&mut self) -> [u8; 32];

    /// Hash data with domain separation
    fn hash_with_domain(&mut self, domain: &str, data: &[u8]) -> [u8; 32] {
        // Add domain prefix for domain separation
        self.update(domain.as_bytes());

        // Add domain length as a single byte for additional protection
        self.update(&[domain.len() as u8]);

        // Add the actual data
        self.update(data);

        // Finalize and return
        self.finalize()
    }

    /// Hash multiple data elements with domain separation
    fn hash_multiple_with_domain(&mut self, domain: &str, data: &[&[u8]]) -> [u8; 32] {
        // Add domain prefix for domain separation
        self.update(domain.as_bytes());

        // Add domain length as a single byte for additional protection
        self.update(&[domain.len() as u8]);

        // Add number of elements as a protection against concatenation attacks
        self.update(&[data.len() as u8]);

        // Add each element with its length prefix
        for element in data {
            // Add a 4-byte length prefix in big-endian format
            self.update(&(element.len() as u32).to_be_bytes());

            // Add the actual data
            self.update(element);
        }

        // Finalize and return
        self.finalize()
    }

    /// Clone the hasher
    fn clone_box(&self) -> Box<dyn SecureHasher>;
}

/// Create a hasher for the given algorithm
pub fn create_hasher(algorithm: HashAlgorithm) -> Box<dyn SecureHasher> {
    match algorithm {
        HashAlgorithm::Sha256 => Box::new(Sha256Hasher::new()),
        HashAlgorithm::Blake2s => Box::new(Blake2sHasher::new()),
        HashAlgorithm::Keccak256 => Box::new(Keccak256Hasher::new()),
    }
}

/// SHA-256 implementation of SecureHasher
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    /// Create a new SHA-256 hasher
    pub fn new() -> Self {
        Sha256Hasher {
            inner: Sha256::new(),
        }
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(&mut self) -> [u8; 32] {
        let result = self.inner.clone().finalize();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    fn clone_box(&self) -> Box<dyn SecureHasher> {
        Box::new(self.clone())
    }
}

/// Blake2s implementation of SecureHasher
#[derive(Debug, Clone)]
pub struct Blake2sHasher {
    inner: Blake2s256,
}

impl Blake2sHasher {
    /// Create a new Blake2s hasher
    pub fn new() -> Self {
        Blake2sHasher {
            inner: Blake2s256::new(),
        }
    }
}

impl Default for Blake2sHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureHasher for Blake2sHasher {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(&mut self) -> [u8; 32] {
        let result = self.inner.clone().finalize();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    fn clone_box(&self) -> Box<dyn SecureHasher> {
        Box::new(self.clone())
    }
}

/// Keccak-256 implementation of SecureHasher
#[derive(Debug, Clone)]
pub struct Keccak256Hasher {
    inner: Keccak256,
}

impl Keccak256Hasher {
    /// Create a new Keccak-256 hasher
    pub fn new() -> Self {
        Keccak256Hasher {
            inner: Keccak256::new(),
        }
    }
}

impl Default for Keccak256Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureHasher for Keccak256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    fn finalize(&mut self) -> [u8; 32] {
        let result = self.inner.clone().finalize();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    fn clone_box(&self) -> Box<dyn SecureHasher> {
        Box::new(self.clone())
    }
}
