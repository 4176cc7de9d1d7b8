//! # Block Production
//!
//! Runs only on nodes configured with a private key. Every `block_time`:
//!
//! ```text
//! 1. TIP      — read the current tip header
//! 2. DRAIN    — take pending transactions out of the pool, up to the
//!               block size budget; the overflow goes back
//! 3. BUILD    — successor block over the drained set, data hash included
//! 4. SIGN     — producer signature over the header hash
//! 5. APPEND   — Chain::add_block
//! 6. GOSSIP   — broadcast the encoded block to every peer
//! ```
//!
//! One block per tick, empty or not. A block is only announced after the
//! local chain accepted it, so peers never see a block we rejected.
//!
//! A transaction whose program fails in the VM would fail every block that
//! carries it. When APPEND reports an execution failure, that transaction is
//! dropped for good and the block is rebuilt from the rest. Any other append
//! failure puts the whole set back in the pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::mempool::TxPool;
use super::message::{CodecError, Message};
use super::transport::PeerSet;
use crate::config::MAX_BLOCK_BYTES;
use crate::crypto::Keypair;
use crate::storage::chain::ChainError;
use crate::storage::{Block, Chain};
use crate::transaction::Transaction;

/// Room reserved in every block for the header, producer key and signature.
const BLOCK_OVERHEAD: usize = 1024;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum BlockProductionError {
    /// The local chain refused the block. The drained transactions were
    /// returned to the pool.
    Chain(ChainError),

    /// The block was appended but could not be encoded for broadcast.
    Encode(CodecError),
}

impl fmt::Display for BlockProductionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain(e) => write!(f, "produced block rejected by chain: {e}"),
            Self::Encode(e) => write!(f, "produced block could not be encoded: {e}"),
        }
    }
}

impl std::error::Error for BlockProductionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chain(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

impl From<ChainError> for BlockProductionError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

impl From<CodecError> for BlockProductionError {
    fn from(e: CodecError) -> Self {
        Self::Encode(e)
    }
}

// ---------------------------------------------------------------------------
// BlockProducer
// ---------------------------------------------------------------------------

pub struct BlockProducer {
    chain: Arc<Chain>,
    pool: Arc<TxPool>,
    peers: PeerSet,
    keypair: Keypair,
    block_time: Duration,
}

impl BlockProducer {
    pub fn new(
        chain: Arc<Chain>,
        pool: Arc<TxPool>,
        peers: PeerSet,
        keypair: Keypair,
        block_time: Duration,
    ) -> Self {
        Self {
            chain,
            pool,
            peers,
            keypair,
            block_time,
        }
    }

    /// Build, sign, append and announce one block.
    pub fn produce_block(&self) -> Result<Block, BlockProductionError> {
        let tip = self.chain.tip_header();
        let mut txs = self.select_transactions(self.pool.drain_pending());

        let block = loop {
            let mut block = Block::from_prev_header(&tip, txs);
            block.sign(&self.keypair);

            match self.chain.add_block(block.clone()) {
                Ok(()) => break block,
                Err(ChainError::Execution { index, source }) if index < block.tx_count() => {
                    txs = block.transactions;
                    let dropped = txs.remove(index);
                    warn!(
                        tx = %dropped.hash(),
                        error = %source,
                        "dropping transaction that fails to execute"
                    );
                }
                Err(e) => {
                    self.pool.restore(block.transactions);
                    return Err(e.into());
                }
            }
        };

        info!(
            height = block.height(),
            hash = %block.hash(),
            txs = block.tx_count(),
            "produced block"
        );

        let frame = Message::Block(block.clone()).encode()?;
        let sent = self.peers.broadcast(frame, None);
        debug!(height = block.height(), peers = sent, "block broadcast");
        Ok(block)
    }

    /// Longest prefix of `pending` that fits in one block. The rest goes
    /// back to the pool in order. A transaction that could never fit in any
    /// block is dropped.
    fn select_transactions(&self, pending: Vec<Transaction>) -> Vec<Transaction> {
        let capacity = MAX_BLOCK_BYTES - BLOCK_OVERHEAD;
        let mut budget = capacity;
        let mut selected = Vec::new();
        let mut deferred = Vec::new();

        for tx in pending {
            let size = tx.encoded_len();
            if size > capacity {
                warn!(tx = %tx.hash(), size, "dropping transaction larger than a block");
            } else if deferred.is_empty() && size <= budget {
                budget -= size;
                selected.push(tx);
            } else {
                deferred.push(tx);
            }
        }

        if !deferred.is_empty() {
            debug!(deferred = deferred.len(), "block full, deferring transactions");
            self.pool.restore(deferred);
        }
        selected
    }

    /// Produce a block every `block_time` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.block_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of `interval` completes immediately.
        ticker.tick().await;
        info!(
            producer = %self.keypair.public_key().address(),
            block_time = ?self.block_time,
            "block producer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.produce_block() {
                        warn!(error = %e, "block production failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("block producer shutting down");
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
