//! Chain engine
//!
//! [`OpBlockChain`] owns the pending-operation queue, the sealed segment
//! sequence and the chain lock state. It is the single authoritative
//! writer: `create_block`, `lock`/`unlock` and compaction are mutually
//! exclusive, while `add_operation` and read-only queries may run
//! concurrently with them and with each other.

pub mod compaction;

pub use compaction::{CompactionReport, find_merge_candidate};

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::ChainConfig;
use crate::crypto::{KeyPair, PublicKey};
use crate::error::{ChainError, Result};
use crate::model::{BlockHeader, BlockMetadata, OpBlock, Operation, Segment, GENESIS_PREV_HASH};
use crate::registry::{OpKindRegistry, PreparedOp};
use crate::utils::Timer;

/// Protocol version recorded in block metadata
pub const PROTOCOL_VERSION: &str = "1.0";

/// Lock state of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLockState {
    /// Normal operation; new blocks may be sealed
    Unlocked,

    /// Reserved for compaction or administrative pause; no new blocks
    Locked,
}

/// Pending operations awaiting a block, in arrival order
struct PendingQueue {
    queue: VecDeque<Operation>,
    hashes: HashSet<[u8; 32]>,
}

/// The sealed, immutable part of the chain
struct SealedChain {
    segments: Vec<Segment>,
    hashes: HashSet<[u8; 32]>,
    last_block_time: Option<DateTime<Utc>>,
}

/// Single-writer operation chain
pub struct OpBlockChain {
    config: ChainConfig,
    authority: KeyPair,
    authority_public: PublicKey,
    pending: Mutex<PendingQueue>,
    sealed: RwLock<SealedChain>,
    // The chain-wide mutual exclusion region for sealing, locking and
    // compaction. `locked` mirrors the administrative state for
    // non-blocking reads.
    seal_guard: Mutex<()>,
    locked: AtomicBool,
}

impl OpBlockChain {
    /// Create an empty chain owned by the given authority key.
    ///
    /// The first sealed block becomes the genesis block.
    pub fn new(config: ChainConfig, authority: KeyPair) -> Self {
        let authority_public = authority.public_key();
        OpBlockChain {
            config,
            authority,
            authority_public,
            pending: Mutex::new(PendingQueue {
                queue: VecDeque::new(),
                hashes: HashSet::new(),
            }),
            sealed: RwLock::new(SealedChain {
                segments: Vec::new(),
                hashes: HashSet::new(),
                last_block_time: None,
            }),
            seal_guard: Mutex::new(()),
            locked: AtomicBool::new(false),
        }
    }

    /// Chain configuration
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Public half of the chain authority key
    pub fn authority_public_key(&self) -> &PublicKey {
        &self.authority_public
    }

    /// Current lock state (non-blocking read)
    pub fn lock_state(&self) -> ChainLockState {
        if self.locked.load(Ordering::SeqCst) {
            ChainLockState::Locked
        } else {
            ChainLockState::Unlocked
        }
    }

    /// Lock the chain. Fails if it is already locked.
    pub fn lock(&self) -> Result<()> {
        let _guard = self
            .seal_guard
            .lock()
            .map_err(|e| ChainError::State(format!("Failed to acquire seal guard: {}", e)))?;

        if self.locked.load(Ordering::SeqCst) {
            return Err(ChainError::ChainLocked("lock: chain is already locked".to_string()));
        }

        self.locked.store(true, Ordering::SeqCst);
        info!("Chain locked");
        Ok(())
    }

    /// Unlock the chain. Fails if it is not locked.
    pub fn unlock(&self) -> Result<()> {
        let _guard = self
            .seal_guard
            .lock()
            .map_err(|e| ChainError::State(format!("Failed to acquire seal guard: {}", e)))?;

        if !self.locked.load(Ordering::SeqCst) {
            return Err(ChainError::State(
                "unlock: chain is not locked".to_string(),
            ));
        }

        self.locked.store(false, Ordering::SeqCst);
        info!("Chain unlocked");
        Ok(())
    }

    /// Append a sealed, signed operation to the pending queue.
    ///
    /// Operations are kept in arrival order; nothing is reordered. An
    /// operation whose hash is already queued or sealed is rejected; any
    /// further semantic checks belong to the kind's `prepare`.
    pub fn add_operation(&self, operation: Operation) -> Result<()> {
        if !operation.is_signed() {
            return Err(ChainError::Validation(
                "Operation is not signed".to_string(),
            ));
        }
        if !operation.verify_hash() {
            return Err(ChainError::Validation(
                "Operation content hash does not match its contents".to_string(),
            ));
        }

        let hash = *operation.hash();

        // Lock order: sealed before pending, everywhere
        let sealed = self
            .sealed
            .read()
            .map_err(|e| ChainError::State(format!("Failed to read sealed chain: {}", e)))?;
        if sealed.hashes.contains(&hash) {
            return Err(ChainError::Validation(format!(
                "Operation {} is already sealed",
                hex::encode(&hash[0..8])
            )));
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ChainError::State(format!("Failed to lock pending queue: {}", e)))?;
        if !pending.hashes.insert(hash) {
            return Err(ChainError::Validation(format!(
                "Operation {} is already queued",
                hex::encode(&hash[0..8])
            )));
        }
        pending.queue.push_back(operation);

        debug!(
            "Queued operation {} ({} pending)",
            hex::encode(&hash[0..8]),
            pending.queue.len()
        );
        Ok(())
    }

    /// Full admission pipeline for a client-supplied operation: kind
    /// dispatch and `prepare`, payload ceiling, content-hash and signature
    /// verification, then enqueue.
    ///
    /// Returns the prepared fields so the caller can run `execute` once
    /// the operation is sealed into a block. Nothing is enqueued on any
    /// failure.
    pub fn admit(
        &self,
        registry: &OpKindRegistry,
        signer_key: &PublicKey,
        operation: Operation,
    ) -> Result<PreparedOp> {
        let prepared = registry.validate_and_prepare(&operation, &self.config)?;

        if !operation.verify_hash() {
            return Err(ChainError::Validation(
                "Operation content hash does not match its contents".to_string(),
            ));
        }
        if !operation.verify_signature(signer_key) {
            return Err(ChainError::Signature(
                "Operation signature does not verify against the signer key".to_string(),
            ));
        }

        self.add_operation(operation)?;
        Ok(prepared)
    }

    /// Number of pending operations
    pub fn queue_len(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.queue.len())
            .unwrap_or(0)
    }

    /// Number of sealed segments (blocks and superblocks)
    pub fn segment_count(&self) -> usize {
        self.sealed
            .read()
            .map(|sealed| sealed.segments.len())
            .unwrap_or(0)
    }

    /// Number of original blocks represented across all segments
    pub fn total_blocks(&self) -> usize {
        self.sealed
            .read()
            .map(|sealed| sealed.segments.iter().map(Segment::size).sum())
            .unwrap_or(0)
    }

    /// Number of sealed operations across all segments
    pub fn total_operations(&self) -> usize {
        self.sealed
            .read()
            .map(|sealed| sealed.segments.iter().map(Segment::op_count).sum())
            .unwrap_or(0)
    }

    /// Header of the newest sealed block, or `None` for an empty chain
    pub fn last_block_header(&self) -> Option<BlockHeader> {
        self.sealed
            .read()
            .ok()
            .and_then(|sealed| sealed.segments.last().map(|s| s.head_header().clone()))
    }

    /// Creation time of the newest sealed block
    pub fn last_block_time(&self) -> Option<DateTime<Utc>> {
        self.sealed
            .read()
            .ok()
            .and_then(|sealed| sealed.last_block_time)
    }

    /// Sizes of the sealed segments, oldest to newest
    pub fn segment_sizes(&self) -> Vec<usize> {
        self.sealed
            .read()
            .map(|sealed| sealed.segments.iter().map(Segment::size).collect())
            .unwrap_or_default()
    }

    /// Seal the pending queue into a new block.
    ///
    /// Requires an unlocked chain and a non-empty queue. The queue is
    /// drained atomically in FIFO order: operations added while sealing is
    /// in progress land in the next block. The new block links to the
    /// current head, is signed with the authority key and becomes the new
    /// head.
    pub fn create_block(&self) -> Result<OpBlock> {
        let _timer = Timer::new("create_block");
        let _guard = self
            .seal_guard
            .lock()
            .map_err(|e| ChainError::State(format!("Failed to acquire seal guard: {}", e)))?;

        if self.locked.load(Ordering::SeqCst) {
            return Err(ChainError::ChainLocked(
                "create_block: chain is locked".to_string(),
            ));
        }

        // Drain the queue. Drained hashes stay in the pending set until the
        // block is committed, so duplicate submissions remain blocked for
        // the whole sealing window.
        let operations: Vec<Operation> = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|e| ChainError::State(format!("Failed to lock pending queue: {}", e)))?;

            if pending.queue.is_empty() {
                return Err(ChainError::Validation(
                    "create_block: pending queue is empty".to_string(),
                ));
            }

            pending.queue.drain(..).collect()
        };

        // The seal guard is held, so the sealed sequence cannot change
        // between this read and the commit below.
        let (block_id, prev_hash) = {
            let sealed = self
                .sealed
                .read()
                .map_err(|e| ChainError::State(format!("Failed to read sealed chain: {}", e)))?;
            match sealed.segments.last() {
                Some(head) => (head.last_block_id() + 1, *head.head_hash()),
                None => (0, GENESIS_PREV_HASH),
            }
        };

        let date = Utc::now();
        let metadata = BlockMetadata {
            operator_id: self.config.operator_id.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            instance_id: self.config.instance_id,
        };

        let block = match OpBlock::create(
            block_id,
            prev_hash,
            date,
            operations.clone(),
            metadata,
            self.config.operator_id.clone(),
            &self.authority,
        ) {
            Ok(block) => block,
            Err(err) => {
                // Never lose drained operations: put them back at the front
                // in their original order. Their hashes never left the
                // pending set, so duplicates stayed blocked throughout.
                let mut pending = self.pending.lock().map_err(|e| {
                    ChainError::State(format!("Failed to lock pending queue: {}", e))
                })?;
                for operation in operations.into_iter().rev() {
                    pending.queue.push_front(operation);
                }
                return Err(err);
            }
        };

        let op_hashes = block.op_hashes();

        {
            let mut sealed = self
                .sealed
                .write()
                .map_err(|e| ChainError::State(format!("Failed to write sealed chain: {}", e)))?;
            let mut pending = self
                .pending
                .lock()
                .map_err(|e| ChainError::State(format!("Failed to lock pending queue: {}", e)))?;

            sealed.hashes.extend(op_hashes.iter().copied());
            sealed.last_block_time = Some(date);
            sealed.segments.push(Segment::Block(block.clone()));

            for hash in &op_hashes {
                pending.hashes.remove(hash);
            }
        }

        info!(
            "Sealed block {} with {} operations, hash {}",
            block_id,
            block.header().op_count,
            hex::encode(&block.hash()[0..8])
        );
        Ok(block)
    }

    /// Compact the sealed segment sequence.
    ///
    /// Takes the chain-wide exclusion region, locks the chain for the
    /// duration and merges eligible segments into superblocks until the
    /// size invariant holds everywhere. The chain is restored to
    /// `Unlocked` on completion or failure. Compaction never reorders or
    /// drops operations.
    pub fn compact(&self) -> Result<CompactionReport> {
        let _timer = Timer::new("compact");
        let _guard = self
            .seal_guard
            .lock()
            .map_err(|e| ChainError::State(format!("Failed to acquire seal guard: {}", e)))?;

        if self.locked.load(Ordering::SeqCst) {
            return Err(ChainError::ChainLocked(
                "compact: chain is locked by an administrator".to_string(),
            ));
        }

        self.locked.store(true, Ordering::SeqCst);

        let result = (|| -> Result<CompactionReport> {
            let mut sealed = self
                .sealed
                .write()
                .map_err(|e| ChainError::State(format!("Failed to write sealed chain: {}", e)))?;

            let segments_before = sealed.segments.len();
            let merges =
                compaction::run_merge_passes(&mut sealed.segments, self.config.compaction.coefficient)?;

            Ok(CompactionReport {
                merges,
                segments_before,
                segments_after: sealed.segments.len(),
            })
        })();

        // Restore on completion or failure
        self.locked.store(false, Ordering::SeqCst);

        if let Ok(report) = &result {
            if report.changed() {
                info!(
                    "Compaction merged {} segment(s): {} -> {}",
                    report.merges, report.segments_before, report.segments_after
                );
            }
        }

        result
    }

    /// Re-verify the entire sealed sequence: every hash link between
    /// segments, every block hash and signature, every operation hash.
    ///
    /// A mismatch on sealed data is an unrecoverable defect, reported as
    /// `CorruptChain`.
    pub fn validate(&self) -> Result<()> {
        let sealed = self
            .sealed
            .read()
            .map_err(|e| ChainError::State(format!("Failed to read sealed chain: {}", e)))?;

        let mut prev_hash = GENESIS_PREV_HASH;
        for segment in &sealed.segments {
            if segment.tail_prev_hash() != prev_hash {
                return Err(ChainError::CorruptChain(format!(
                    "Broken hash link before block {}",
                    segment.first_block_id()
                )));
            }

            match segment {
                Segment::Block(block) => {
                    if !block.verify(&self.authority_public) {
                        return Err(ChainError::CorruptChain(format!(
                            "Block {} failed verification",
                            block.header().block_id
                        )));
                    }
                }
                Segment::Super(superblock) => {
                    if !superblock.verify_hash() {
                        return Err(ChainError::CorruptChain(format!(
                            "Superblock {}..={} failed hash verification",
                            segment.first_block_id(),
                            segment.last_block_id()
                        )));
                    }
                    if !segment.operations().iter().all(Operation::verify_hash) {
                        return Err(ChainError::CorruptChain(format!(
                            "Superblock {}..={} holds an operation with a bad hash",
                            segment.first_block_id(),
                            segment.last_block_id()
                        )));
                    }
                    if !segment.head_header().verify_signature(&self.authority_public) {
                        return Err(ChainError::CorruptChain(format!(
                            "Superblock {}..={} head signature failed verification",
                            segment.first_block_id(),
                            segment.last_block_id()
                        )));
                    }
                }
            }

            prev_hash = *segment.head_hash();
        }

        Ok(())
    }
}

impl std::fmt::Debug for OpBlockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpBlockChain")
            .field("operator_id", &self.config.operator_id)
            .field("lock_state", &self.lock_state())
            .field("queue_len", &self.queue_len())
            .field("segments", &self.segment_count())
            .finish()
    }
}
