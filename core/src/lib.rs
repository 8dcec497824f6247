//! # OpLedger Core
//!
//! Core of a single-writer, cryptographically verifiable operation ledger
//! backing a relational data store. Every state change is a signed, typed
//! operation; operations are grouped into hash-chained blocks, and old
//! blocks are periodically folded into superblocks to bound
//! chain-traversal cost.
//!
//! The crate provides the chain engine, the operation model, the operation
//! kind registry, the compaction policy, the crypto identity layer and the
//! pure scheduling decisions. The HTTP surface, the relational driver and
//! the trigger clock live outside and talk to the seams exposed here
//! ([`registry::SqlSink`], [`replication::RemoteChainSource`], the
//! [`scheduler`] entry points).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod model;
pub mod registry;
pub mod replication;
pub mod scheduler;
pub mod utils;

/// Re-export common types for ease of use
pub use chain::{ChainLockState, OpBlockChain};
pub use config::ChainConfig;
pub use crypto::{derive_key_pair, KeyPair, PublicKey, SignatureAlgorithm};
pub use error::{ChainError, Result};
pub use model::{CompoundKey, ObjectEntry, OpBlock, OpDraft, Operation, Superblock};
pub use registry::{OpKindRegistry, SqlSink};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a domain-separated secure hash
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
    crypto::secure_hash(domain, data)
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
    crypto::secure_hash_multiple(domain, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_hash_domain_separation() {
        let data = b"test data";

        // Different domains should produce different hashes
        let hash1 = secure_hash("DOMAIN1", data);
        let hash2 = secure_hash("DOMAIN2", data);

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_secure_hash_multiple() {
        let data1 = b"test data 1";
        let data2 = b"test data 2";

        let hash1 = secure_hash_multiple("TEST", &[data1, data2]);

        // Order matters
        let hash2 = secure_hash_multiple("TEST", &[data2, data1]);

        assert_ne!(hash1, hash2);
    }

    /// End-to-end: admit operations through the registry, seal them,
    /// execute their side effects and compact the history.
    #[test]
    fn test_ledger_end_to_end() {
        use serde_json::json;
        use crate::registry::{ExecutionContext, MockSqlSink};

        let _ = env_logger::builder().is_test(true).try_init();

        let authority = KeyPair::generate(SignatureAlgorithm::EcSecp256k1);
        let chain = OpBlockChain::new(ChainConfig::testing(), authority);
        let registry = OpKindRegistry::with_builtins();

        // A user derives their identity keys from name and password
        let user_key =
            derive_key_pair("openplace:alice", "correct horse battery", SignatureAlgorithm::EcSecp256k1)
                .unwrap();

        let signup = OpDraft::new("signup")
            .with_id(CompoundKey::single("alice"))
            .add_new(
                ObjectEntry::new(vec!["alice".to_string()])
                    .with_field("pubkey", json!(user_key.public_key().encode())),
            )
            .signed_by("alice")
            .sign_and_seal(&user_key)
            .unwrap();

        let create_table = OpDraft::new("create_table")
            .with_id(CompoundKey::single("places"))
            .add_new(
                ObjectEntry::new(vec!["places".to_string()])
                    .with_field("name", json!("places"))
                    .with_field("table_columns", json!({"id": "bigint", "tags": "jsonb"})),
            )
            .signed_by("alice")
            .sign_and_seal(&user_key)
            .unwrap();

        let prepared_signup = chain
            .admit(&registry, &user_key.public_key(), signup)
            .unwrap();
        let prepared_table = chain
            .admit(&registry, &user_key.public_key(), create_table)
            .unwrap();
        assert_eq!(chain.queue_len(), 2);

        // Seal the queue into the genesis block
        let block = chain.create_block().unwrap();
        assert_eq!(block.operations().len(), 2);
        assert!(chain.validate().is_ok());

        // Execute the side effects against the sink
        let mut sink = MockSqlSink::new();
        sink.expect_execute_ddl().times(1).returning(|_| Ok(()));
        let mut context = ExecutionContext::new(&mut sink);

        registry.execute(&prepared_signup, &mut context).unwrap();
        registry.execute(&prepared_table, &mut context).unwrap();
        assert_eq!(context.executed().len(), 2);
        assert!(context.identity("alice").is_some());
    }
}
