//! Block and superblock representation
//!
//! A block is a sealed, ordered batch of operations; blocks are
//! hash-chained into the sealed sequence. Compaction folds contiguous runs
//! of sealed blocks into superblocks, which keep every operation and the
//! full chaining contract while shortening traversal length.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::{self, KeyPair, PublicKey};
use crate::error::{ChainError, Result};
use super::domains;
use super::hex32;
use super::operation::Operation;

/// Previous-hash value of the genesis block
pub const GENESIS_PREV_HASH: [u8; 32] = [0; 32];

/// Metadata recorded in every block header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Identity name of the operator that sealed the block
    pub operator_id: String,

    /// Protocol version
    pub protocol_version: String,

    /// Deployment this block was sealed by
    pub instance_id: Uuid,
}

/// Header for a sealed block
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number (0 for genesis)
    pub block_id: u64,

    /// Hash of the previous block; [`GENESIS_PREV_HASH`] for genesis
    #[serde(with = "hex32")]
    pub prev_hash: [u8; 32],

    /// Block creation timestamp
    pub date: DateTime<Utc>,

    /// Number of operations sealed in the block
    pub op_count: usize,

    /// Block metadata
    pub metadata: BlockMetadata,

    /// Identity name of the block signer
    pub signed_by: String,

    /// Hex-encoded block signature by the chain authority key
    pub signature: Option<String>,

    /// Block hash
    #[serde(with = "hex32")]
    pub hash: [u8; 32],
}

impl Debug for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BlockHeader")
            .field("block_id", &self.block_id)
            .field("prev_hash", &hex::encode(&self.prev_hash[0..4]))
            .field("hash", &hex::encode(&self.hash[0..4]))
            .field("date", &self.date)
            .field("op_count", &self.op_count)
            .field("signed_by", &self.signed_by)
            .finish()
    }
}

impl BlockHeader {
    /// Calculate the block hash with domain separation.
    ///
    /// The hash covers the block number, the previous hash, the timestamp,
    /// the metadata and the ordered operation hashes; independent
    /// recomputation over the same contents always matches.
    pub fn calculate_hash(
        block_id: u64,
        prev_hash: &[u8; 32],
        date: &DateTime<Utc>,
        metadata: &BlockMetadata,
        op_hashes: &[[u8; 32]],
    ) -> Result<[u8; 32]> {
        let id_bytes = block_id.to_be_bytes();
        let timestamp_bytes = date.timestamp_millis().to_be_bytes();
        let metadata_bytes = serde_json::to_vec(metadata)?;

        let mut parts: Vec<&[u8]> =
            Vec::with_capacity(4 + op_hashes.len());
        parts.push(&id_bytes);
        parts.push(prev_hash);
        parts.push(&timestamp_bytes);
        parts.push(&metadata_bytes);
        for hash in op_hashes {
            parts.push(hash);
        }

        Ok(crypto::secure_hash_multiple(domains::BLOCK, &parts))
    }

    /// Recompute the hash over the given operation hashes and compare
    pub fn verify_hash(&self, op_hashes: &[[u8; 32]]) -> bool {
        match Self::calculate_hash(
            self.block_id,
            &self.prev_hash,
            &self.date,
            &self.metadata,
            op_hashes,
        ) {
            Ok(recomputed) => crypto::verify_hash(&self.hash, &recomputed),
            Err(_) => false,
        }
    }

    /// Verify the block-level signature against the chain authority key
    pub fn verify_signature(&self, authority: &PublicKey) -> bool {
        let signature = match &self.signature {
            Some(signature) => signature,
            None => return false,
        };
        let raw = match hex::decode(signature) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        authority.verify(&self.hash, &raw)
    }
}

/// A sealed block of operations
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OpBlock {
    header: BlockHeader,
    operations: Vec<Operation>,
}

impl Debug for OpBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("OpBlock")
            .field("header", &self.header)
            .finish()
    }
}

impl OpBlock {
    /// Seal a block over an ordered batch of operations.
    ///
    /// Computes the deterministic block hash and signs it with the chain
    /// authority key. Once created, the block is immutable.
    pub fn create(
        block_id: u64,
        prev_hash: [u8; 32],
        date: DateTime<Utc>,
        operations: Vec<Operation>,
        metadata: BlockMetadata,
        signed_by: impl Into<String>,
        signer: &KeyPair,
    ) -> Result<OpBlock> {
        let op_hashes: Vec<[u8; 32]> = operations.iter().map(|op| *op.hash()).collect();
        let hash =
            BlockHeader::calculate_hash(block_id, &prev_hash, &date, &metadata, &op_hashes)?;
        let signature = hex::encode(signer.sign(&hash));

        Ok(OpBlock {
            header: BlockHeader {
                block_id,
                prev_hash,
                date,
                op_count: operations.len(),
                metadata,
                signed_by: signed_by.into(),
                signature: Some(signature),
                hash,
            },
            operations,
        })
    }

    /// Block header
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Sealed operations in order
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Block hash
    pub fn hash(&self) -> &[u8; 32] {
        &self.header.hash
    }

    /// Previous block hash
    pub fn prev_hash(&self) -> &[u8; 32] {
        &self.header.prev_hash
    }

    /// Whether this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash == GENESIS_PREV_HASH
    }

    /// Ordered operation hashes
    pub fn op_hashes(&self) -> Vec<[u8; 32]> {
        self.operations.iter().map(|op| *op.hash()).collect()
    }

    /// Verify every operation hash in the block
    pub fn verify_operations(&self) -> bool {
        self.operations.iter().all(Operation::verify_hash)
    }

    /// Verify the entire block: header hash, operation hashes and the
    /// authority signature
    pub fn verify(&self, authority: &PublicKey) -> bool {
        self.header.verify_hash(&self.op_hashes())
            && self.verify_operations()
            && self.header.verify_signature(authority)
    }
}

/// A compacted run of contiguous blocks.
///
/// Compaction is a lossless re-grouping: every operation of the merged
/// range is retained in order, and the original block hashes are kept so
/// the run stays auditable. The superblock hash subsumes the merged range.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Superblock {
    /// Block number of the oldest merged block
    first_block_id: u64,

    /// Block number of the newest merged block
    last_block_id: u64,

    /// Previous hash of the oldest merged block
    #[serde(with = "hex32")]
    prev_hash: [u8; 32],

    /// Hash of the newest merged block; the next segment links to this
    #[serde(with = "hex32")]
    head_hash: [u8; 32],

    /// Header of the newest merged block
    head_header: BlockHeader,

    /// Ordered hashes of every original block in the run
    block_hashes: Vec<[u8; 32]>,

    /// Superblock hash over the ordered original block hashes
    #[serde(with = "hex32")]
    hash: [u8; 32],

    /// Number of original blocks represented
    block_count: usize,

    /// Number of operations represented
    op_count: usize,

    /// Every operation of the merged range, in original order
    operations: Vec<Operation>,
}

impl Debug for Superblock {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Superblock")
            .field("blocks", &(self.first_block_id..=self.last_block_id))
            .field("block_count", &self.block_count)
            .field("op_count", &self.op_count)
            .field("hash", &hex::encode(&self.hash[0..4]))
            .finish()
    }
}

impl Superblock {
    /// Merge two adjacent segments into one superblock.
    ///
    /// `older` must be the segment immediately preceding `newer` in the
    /// sealed sequence; a broken link between the two is a chain defect.
    pub fn merge(older: &Segment, newer: &Segment) -> Result<Superblock> {
        if newer.tail_prev_hash() != *older.head_hash() {
            return Err(ChainError::CorruptChain(format!(
                "Cannot merge segments {}..={} and {}..={}: broken hash link",
                older.first_block_id(),
                older.last_block_id(),
                newer.first_block_id(),
                newer.last_block_id(),
            )));
        }

        let mut block_hashes = older.block_hashes();
        block_hashes.extend(newer.block_hashes());

        let hash_slices: Vec<&[u8]> = block_hashes.iter().map(|h| &h[..]).collect();
        let hash = crypto::secure_hash_multiple(domains::SUPERBLOCK, &hash_slices);

        let mut operations =
            Vec::with_capacity(older.op_count() + newer.op_count());
        operations.extend_from_slice(older.operations());
        operations.extend_from_slice(newer.operations());

        Ok(Superblock {
            first_block_id: older.first_block_id(),
            last_block_id: newer.last_block_id(),
            prev_hash: older.tail_prev_hash(),
            head_hash: *newer.head_hash(),
            head_header: newer.head_header().clone(),
            block_count: older.size() + newer.size(),
            op_count: operations.len(),
            hash,
            block_hashes,
            operations,
        })
    }

    /// Superblock hash
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Number of original blocks represented
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of operations represented
    pub fn op_count(&self) -> usize {
        self.op_count
    }

    /// Recompute the superblock hash from the recorded block hashes
    pub fn verify_hash(&self) -> bool {
        let hash_slices: Vec<&[u8]> = self.block_hashes.iter().map(|h| &h[..]).collect();
        let recomputed = crypto::secure_hash_multiple(domains::SUPERBLOCK, &hash_slices);
        crypto::verify_hash(&self.hash, &recomputed)
    }
}

/// One element of the sealed sequence: a single block or a compacted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    /// A single sealed block
    Block(OpBlock),

    /// A compacted run of blocks
    Super(Superblock),
}

impl Segment {
    /// Number of original blocks this segment represents
    pub fn size(&self) -> usize {
        match self {
            Segment::Block(_) => 1,
            Segment::Super(superblock) => superblock.block_count,
        }
    }

    /// Number of operations this segment represents
    pub fn op_count(&self) -> usize {
        match self {
            Segment::Block(block) => block.operations.len(),
            Segment::Super(superblock) => superblock.op_count,
        }
    }

    /// Block number of the oldest represented block
    pub fn first_block_id(&self) -> u64 {
        match self {
            Segment::Block(block) => block.header.block_id,
            Segment::Super(superblock) => superblock.first_block_id,
        }
    }

    /// Block number of the newest represented block
    pub fn last_block_id(&self) -> u64 {
        match self {
            Segment::Block(block) => block.header.block_id,
            Segment::Super(superblock) => superblock.last_block_id,
        }
    }

    /// Hash of the newest represented block; the next segment links here
    pub fn head_hash(&self) -> &[u8; 32] {
        match self {
            Segment::Block(block) => block.hash(),
            Segment::Super(superblock) => &superblock.head_hash,
        }
    }

    /// Previous hash of the oldest represented block
    pub fn tail_prev_hash(&self) -> [u8; 32] {
        match self {
            Segment::Block(block) => block.header.prev_hash,
            Segment::Super(superblock) => superblock.prev_hash,
        }
    }

    /// Header of the newest represented block
    pub fn head_header(&self) -> &BlockHeader {
        match self {
            Segment::Block(block) => &block.header,
            Segment::Super(superblock) => &superblock.head_header,
        }
    }

    /// Every represented operation, in original order
    pub fn operations(&self) -> &[Operation] {
        match self {
            Segment::Block(block) => &block.operations,
            Segment::Super(superblock) => &superblock.operations,
        }
    }

    /// Ordered hashes of every represented original block
    pub fn block_hashes(&self) -> Vec<[u8; 32]> {
        match self {
            Segment::Block(block) => vec![block.header.hash],
            Segment::Super(superblock) => superblock.block_hashes.clone(),
        }
    }
}
