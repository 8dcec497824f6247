//! Asymmetric identity layer
//!
//! Password-derived secp256k1 key pairs, deterministic message signing
//! and signature verification. The same `(identity name, password)` pair
//! always yields bit-identical key material, so an identity can re-derive
//! its keys on any machine without storing them.
//!
//! The algorithm tag is recorded alongside every public key; a ledger
//! never mixes hash-and-curve combinations.

use argon2::{Algorithm, Argon2, Params, Version};
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use serde::{Serialize, Deserialize};
use zeroize::Zeroize;

use crate::crypto::secure_hash;
use crate::error::{ChainError, Result};

/// Minimum password length accepted by key derivation (entropy floor)
pub const MIN_PASSWORD_LEN: usize = 10;

// Argon2id cost parameters. Fixed per algorithm tag; changing them changes
// every derived key, so they are constants rather than configuration.
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MiB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// Domain for the KDF salt derived from the identity name
const KDF_SALT_DOMAIN: &str = "OPLEDGER_KDF_SALT";

/// Domain for re-hashing a seed that is not a valid curve scalar
const KDF_RETRY_DOMAIN: &str = "OPLEDGER_KDF_RETRY";

/// Signature algorithm tag
///
/// Recorded with every public key so that key material from a different
/// hash-and-curve combination is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA over secp256k1 with SHA-256 message digests
    EcSecp256k1,
}

impl SignatureAlgorithm {
    /// The tag prefix used in encoded keys
    pub fn tag(&self) -> &'static str {
        match self {
            SignatureAlgorithm::EcSecp256k1 => "ec:secp256k1",
        }
    }

    /// Parse an algorithm tag
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "ec:secp256k1" => Ok(SignatureAlgorithm::EcSecp256k1),
            other => Err(ChainError::Signature(format!(
                "Unknown signature algorithm tag: {}",
                other
            ))),
        }
    }
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        SignatureAlgorithm::EcSecp256k1
    }
}

/// Compressed secp256k1 public key with its algorithm tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    algorithm: SignatureAlgorithm,
    bytes: [u8; 33],
}

impl PublicKey {
    /// Create from compressed SEC1 bytes (33 bytes, starting with 0x02 or 0x03)
    pub fn from_bytes(algorithm: SignatureAlgorithm, bytes: [u8; 33]) -> Result<Self> {
        // Validate it's a valid compressed point
        VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| ChainError::Signature("Invalid public key material".to_string()))?;
        Ok(PublicKey { algorithm, bytes })
    }

    /// Parse an encoded public key of the form `<algorithm>:<hex>`
    /// (e.g. `ec:secp256k1:02ab...`)
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let (tag, hex_part) = encoded.rsplit_once(':').ok_or_else(|| {
            ChainError::Signature(format!("Malformed public key encoding: {}", encoded))
        })?;

        let algorithm = SignatureAlgorithm::from_tag(tag)?;
        let raw = hex::decode(hex_part)?;
        if raw.len() != 33 {
            return Err(ChainError::Signature(format!(
                "Invalid public key length: expected 33 bytes, got {}",
                raw.len()
            )));
        }

        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&raw);
        Self::from_bytes(algorithm, bytes)
    }

    /// Encode as `<algorithm>:<hex>`
    pub fn encode(&self) -> String {
        format!("{}:{}", self.algorithm.tag(), hex::encode(self.bytes))
    }

    /// The algorithm tag recorded with this key
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Raw compressed bytes
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.bytes
    }

    /// Verify a signature over a message.
    ///
    /// A malformed or non-matching signature returns `false`; this method
    /// never fails on signature material. Key material was validated at
    /// construction time.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let verifying_key = match VerifyingKey::from_sec1_bytes(&self.bytes) {
            Ok(key) => key,
            // Unreachable for keys built through the constructors
            Err(_) => return false,
        };

        let sig = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        verifying_key.verify(message, &sig).is_ok()
    }
}

/// secp256k1 key pair with its algorithm tag
pub struct KeyPair {
    algorithm: SignatureAlgorithm,
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random key pair (for chain authority keys that are
    /// not derived from a password)
    pub fn generate(algorithm: SignatureAlgorithm) -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        KeyPair {
            algorithm,
            signing_key,
        }
    }

    /// Create a key pair from 32 seed bytes.
    ///
    /// On the negligible chance the seed is not a valid curve scalar, it is
    /// re-hashed deterministically until one is found, so equal seeds always
    /// produce equal keys.
    pub fn from_seed(algorithm: SignatureAlgorithm, seed: [u8; 32]) -> Self {
        let mut candidate = seed;
        let signing_key = loop {
            match SigningKey::from_bytes((&candidate).into()) {
                Ok(key) => break key,
                Err(_) => candidate = secure_hash(KDF_RETRY_DOMAIN, &candidate),
            }
        };

        KeyPair {
            algorithm,
            signing_key,
        }
    }

    /// The algorithm tag of this key pair
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Public half of the key pair (compressed, 33 bytes)
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        let sec1_bytes = verifying_key.to_sec1_bytes();
        // A SEC1 compressed public key is always exactly 33 bytes
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1_bytes[..33]);
        PublicKey {
            algorithm: self.algorithm,
            bytes,
        }
    }

    /// Sign a message (deterministic, RFC 6979)
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let sig: Signature = self.signing_key.sign(message);
        sig.to_bytes().into()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key().encode())
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        // Zeroize secret key material
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

/// Derive a key pair from an identity name and password.
///
/// Derivation stretches `(password, identity name)` through Argon2id with
/// fixed cost parameters into a 32-byte seed and maps the seed onto the
/// curve, so the same inputs always yield bit-identical key material.
///
/// # Arguments
///
/// * `identity_name` - Identity the key pair belongs to (acts as the salt)
/// * `password` - Password; must be at least [`MIN_PASSWORD_LEN`] characters
/// * `algorithm` - Signature algorithm tag to record with the key
///
/// # Returns
///
/// The derived key pair, or `WeakPassword` if the password is below the
/// entropy floor.
pub fn derive_key_pair(
    identity_name: &str,
    password: &str,
    algorithm: SignatureAlgorithm,
) -> Result<KeyPair> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(ChainError::WeakPassword(length, MIN_PASSWORD_LEN));
    }

    // The identity name is stretched into a fixed-size salt; Argon2 requires
    // a minimum salt length the raw name may not meet.
    let salt = secure_hash(KDF_SALT_DOMAIN, identity_name.as_bytes());

    let params = Params::new(
        ARGON2_MEMORY_KB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| ChainError::Signature(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut seed = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), &salt, &mut seed)
        .map_err(|e| ChainError::Signature(format!("Key derivation failed: {}", e)))?;

    let pair = KeyPair::from_seed(algorithm, seed);
    seed.zeroize();

    Ok(pair)
}

/// Verify a signature against an encoded public key.
///
/// A malformed signature returns `Ok(false)`; malformed key material is an
/// error.
pub fn verify_encoded(encoded_key: &str, message: &[u8], signature: &[u8]) -> Result<bool> {
    let key = PublicKey::from_encoded(encoded_key)?;
    Ok(key.verify(message, signature))
}
