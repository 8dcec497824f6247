//! Scheduling policy and periodic triggers
//!
//! The decision functions are pure: they consume the current time, the
//! last block timestamp, the pending-queue size and the configured
//! tunables, and never perform I/O. The trigger runner is the cooperative
//! tick that invokes them on a fixed cadence; a tick never overlaps its
//! own previous invocation, and a failed attempt is logged and retried on
//! the next tick rather than treated as fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::chain::OpBlockChain;
use crate::config::BlockPolicyConfig;
use crate::replication::{self, RemoteChainSource, ReplicationStatus};

fn elapsed_seconds(now: DateTime<Utc>, since: Option<DateTime<Utc>>) -> i64 {
    match since {
        Some(since) => (now - since).num_seconds(),
        // No prior event: treat as infinitely long ago
        None => i64::MAX,
    }
}

/// Decide whether a block should be created now.
///
/// True once the elapsed time since the last block exceeds
/// `max_seconds_interval` (a block is forced regardless of queue size), or
/// once it exceeds `min_seconds_interval` with at least `min_queue_size`
/// operations pending.
pub fn should_create_block(
    now: DateTime<Utc>,
    last_block_time: Option<DateTime<Utc>>,
    queue_len: usize,
    policy: &BlockPolicyConfig,
) -> bool {
    let elapsed = elapsed_seconds(now, last_block_time);

    elapsed > policy.max_seconds_interval as i64
        || (elapsed > policy.min_seconds_interval as i64 && queue_len >= policy.min_queue_size)
}

/// Decide whether a replication check should run now
pub fn should_replicate(
    now: DateTime<Utc>,
    last_replication: Option<DateTime<Utc>>,
    policy: &BlockPolicyConfig,
) -> bool {
    elapsed_seconds(now, last_replication) > policy.replicate_interval as i64
}

/// The two idempotent periodic entry points, bound to a chain.
///
/// Each tick skips itself if its previous invocation is still running;
/// block creation and replication may otherwise run concurrently and
/// serialize on the chain-wide lock for any mutating step.
pub struct TriggerRunner {
    chain: Arc<OpBlockChain>,
    remote: Option<Arc<dyn RemoteChainSource>>,
    last_replication: Mutex<Option<DateTime<Utc>>>,
    block_tick_running: AtomicBool,
    replication_tick_running: AtomicBool,
}

impl TriggerRunner {
    /// Create a runner over a chain and an optional replication source
    pub fn new(chain: Arc<OpBlockChain>, remote: Option<Arc<dyn RemoteChainSource>>) -> Self {
        TriggerRunner {
            chain,
            remote,
            last_replication: Mutex::new(None),
            block_tick_running: AtomicBool::new(false),
            replication_tick_running: AtomicBool::new(false),
        }
    }

    /// Periodic block-creation check. Returns whether a block was sealed.
    pub fn block_tick(&self) -> anyhow::Result<bool> {
        if self.block_tick_running.swap(true, Ordering::SeqCst) {
            debug!("Skipping block tick: previous invocation still running");
            return Ok(false);
        }

        let result = self.run_block_check();
        self.block_tick_running.store(false, Ordering::SeqCst);
        result
    }

    fn run_block_check(&self) -> anyhow::Result<bool> {
        let queue_len = self.chain.queue_len();
        if queue_len == 0 {
            return Ok(false);
        }

        let policy = &self.chain.config().policy;
        if !should_create_block(Utc::now(), self.chain.last_block_time(), queue_len, policy) {
            return Ok(false);
        }

        let block = self
            .chain
            .create_block()
            .context("periodic block creation failed")?;
        info!(
            "Trigger sealed block {} with {} operations",
            block.header().block_id,
            block.header().op_count
        );
        Ok(true)
    }

    /// Periodic replication check. Returns whether a check ran.
    pub fn replication_tick(&self) -> anyhow::Result<bool> {
        if self.replication_tick_running.swap(true, Ordering::SeqCst) {
            debug!("Skipping replication tick: previous invocation still running");
            return Ok(false);
        }

        let result = self.run_replication_check();
        self.replication_tick_running.store(false, Ordering::SeqCst);
        result
    }

    fn run_replication_check(&self) -> anyhow::Result<bool> {
        let remote = match &self.remote {
            Some(remote) => remote,
            None => return Ok(false),
        };

        let now = Utc::now();
        {
            let mut last = self
                .last_replication
                .lock()
                .map_err(|e| anyhow::anyhow!("replication clock poisoned: {}", e))?;

            if !should_replicate(now, *last, &self.chain.config().policy) {
                return Ok(false);
            }

            // The attempt counts against the interval whether or not it
            // succeeds; a failure is retried on the next scheduled tick.
            *last = Some(now);
        }

        let status = replication::check(&self.chain, remote.as_ref())
            .context("replication check failed")?;
        match status {
            ReplicationStatus::InSync => debug!("Replication check: remote in sync"),
            ReplicationStatus::RemoteBehind { blocks } => {
                info!("Replication check: remote behind by {} block(s)", blocks)
            }
        }
        Ok(true)
    }
}

/// Drive the trigger runner on a fixed cadence until shutdown.
///
/// Tick failures are logged and never stop the loop.
pub async fn run_trigger_loop(
    runner: Arc<TriggerRunner>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = runner.block_tick() {
                    warn!("Block creation check failed: {:#}; will retry", err);
                }
                if let Err(err) = runner.replication_tick() {
                    warn!("Replication check failed: {:#}; will retry on the next tick", err);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Trigger loop shutting down");
                    break;
                }
            }
        }
    }
}
