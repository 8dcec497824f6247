//! Replication check
//!
//! Replication is a one-directional synchronization check against a remote
//! copy of the chain, not a consensus protocol: there is exactly one
//! authoritative chain owner per deployment. The check compares heads and
//! reports whether the remote is in sync or behind; mismatched history is
//! surfaced for manual resolution and never auto-resolved.

use log::debug;

use crate::chain::OpBlockChain;
use crate::error::{ChainError, Result};
use crate::model::BlockHeader;

/// A remote copy of the chain, reachable through some transport.
///
/// The network client implementing this lives outside the core; the error
/// value is its transport message.
pub trait RemoteChainSource: Send + Sync {
    /// Header of the remote chain's newest block, or `None` for an empty
    /// remote chain
    fn last_block_header(&self) -> std::result::Result<Option<BlockHeader>, String>;
}

/// Outcome of a successful replication check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    /// Remote head matches the local head
    InSync,

    /// Remote is missing this many of the local blocks
    RemoteBehind {
        /// Number of blocks the remote is missing
        blocks: u64,
    },
}

/// Compare the local head against a remote chain.
///
/// Transport failures and divergent histories are both `Replication`
/// errors; divergence requires manual conflict resolution.
pub fn check(chain: &OpBlockChain, remote: &dyn RemoteChainSource) -> Result<ReplicationStatus> {
    let remote_header = remote
        .last_block_header()
        .map_err(|message| ChainError::Replication(format!("Remote unreachable: {}", message)))?;

    let local_header = chain.last_block_header();

    match (local_header, remote_header) {
        (None, None) => Ok(ReplicationStatus::InSync),

        (Some(local), None) => {
            debug!("Remote chain is empty; local head is block {}", local.block_id);
            Ok(ReplicationStatus::RemoteBehind {
                blocks: local.block_id + 1,
            })
        }

        (None, Some(remote)) => Err(ChainError::Replication(format!(
            "Remote has block {} but the local chain is empty; chains have diverged and \
             require manual resolution",
            remote.block_id
        ))),

        (Some(local), Some(remote)) => {
            if remote.block_id == local.block_id {
                if remote.hash == local.hash {
                    Ok(ReplicationStatus::InSync)
                } else {
                    Err(ChainError::Replication(format!(
                        "Remote block {} hash differs from the local block; chains have \
                         diverged and require manual resolution",
                        remote.block_id
                    )))
                }
            } else if remote.block_id < local.block_id {
                Ok(ReplicationStatus::RemoteBehind {
                    blocks: local.block_id - remote.block_id,
                })
            } else {
                Err(ChainError::Replication(format!(
                    "Remote is at block {} but the local head is block {}; chains have \
                     diverged and require manual resolution",
                    remote.block_id, local.block_id
                )))
            }
        }
    }
}
