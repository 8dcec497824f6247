//! Data model for the operation ledger
//!
//! This module provides the compound key, the operation draft/sealed pair,
//! and the block and superblock types that make up the sealed chain.

mod key;
mod operation;
mod block;

pub use key::CompoundKey;
pub use operation::{OpDraft, Operation, ObjectEntry};
pub use block::{OpBlock, BlockHeader, BlockMetadata, Superblock, Segment, GENESIS_PREV_HASH};

/// Serde helper for 32-byte hashes encoded as hex strings
pub(crate) mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = hex::decode(&text).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 hash bytes"))
    }
}

/// Domain constants for content hashing
pub mod domains {
    /// Domain for operation content
    pub const OPERATION: &str = "OPLEDGER_OP";

    /// Domain for block content
    pub const BLOCK: &str = "OPLEDGER_BLOCK";

    /// Domain for superblocks (compacted block runs)
    pub const SUPERBLOCK: &str = "OPLEDGER_SUPERBLOCK";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    #[test]
    fn test_domain_separation() {
        // Different domains must produce different hashes for the same data
        let data = b"test data";

        let op_hash = crypto::secure_hash(domains::OPERATION, data);
        let block_hash = crypto::secure_hash(domains::BLOCK, data);
        let super_hash = crypto::secure_hash(domains::SUPERBLOCK, data);

        assert_ne!(op_hash, block_hash);
        assert_ne!(op_hash, super_hash);
        assert_ne!(block_hash, super_hash);
    }
}
