//! # Catch-Up Synchronization
//!
//! A node that learns (through a `Status` reply) that a peer is ahead runs
//! one catch-up task for that peer:
//!
//! ```text
//! Lagging node                          Peer
//! ────────────                         ──────
//!   │  GetStatus                         │
//!   │──────────────────────────────────> │
//!   │  Status { current_height: 40 }     │
//!   │<────────────────────────────────── │
//!   │  GetBlocks { from: h+1, to: 0 }    │   every interval, or as soon
//!   │──────────────────────────────────> │   as the previous batch landed
//!   │  Blocks [h+1 ..= tip]              │
//!   │<────────────────────────────────── │
//!   │  ... until height >= 40 ...        │
//! ```
//!
//! The task stops when the local height reaches the target, when the peer
//! is gone, after [`MAX_STALLED_ROUNDS`] requests without any progress, or on
//! shutdown. A later, higher `Status` from the same peer raises the target
//! of the running task instead of starting a second one.
//!
//! Serving requests is stateless: [`collect_blocks`] reads the range out of
//! the chain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::message::{GetBlocksMessage, Message};
use super::transport::{PeerSet, TransportError};
use crate::config::{
    CATCH_UP_INTERVAL, MAX_BLOCKS_PER_RESPONSE, MAX_RESPONSE_BYTES, MAX_STALLED_ROUNDS,
};
use crate::storage::{Block, Chain};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CatchUpConfig {
    /// Delay between repeated `GetBlocks` requests when no batch arrives.
    pub interval: Duration,
    /// Give up after this many requests without height progress.
    pub max_stalled_rounds: u32,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            interval: CATCH_UP_INTERVAL,
            max_stalled_rounds: MAX_STALLED_ROUNDS,
        }
    }
}

// ---------------------------------------------------------------------------
// Serving side
// ---------------------------------------------------------------------------

/// Blocks answering a `GetBlocks` request: heights in `[from, to)`, or
/// `[from, tip]` when `to == 0`, capped at [`MAX_BLOCKS_PER_RESPONSE`].
///
/// The reply is also cut once the blocks' encoded size would pass
/// [`MAX_RESPONSE_BYTES`], so the `Blocks` frame always fits under the peer's
/// frame limit. The first block is always included. The requester sees a
/// shorter batch and asks again from its new height.
pub fn collect_blocks(chain: &Chain, request: GetBlocksMessage) -> Vec<Block> {
    let end = if request.to == 0 {
        chain.height().saturating_add(1)
    } else {
        request.to
    };

    let mut budget = MAX_RESPONSE_BYTES;
    let mut blocks = Vec::new();
    for block in chain.blocks_in_range(request.from, end, MAX_BLOCKS_PER_RESPONSE) {
        let size = block.encoded_len();
        if size > budget && !blocks.is_empty() {
            break;
        }
        budget = budget.saturating_sub(size);
        blocks.push(Block::clone(&block));
    }
    blocks
}

// ---------------------------------------------------------------------------
// CatchUpHandle
// ---------------------------------------------------------------------------

/// Node-side handle to a running catch-up task.
///
/// Dropping the handle stops the task at its next wake-up.
#[derive(Debug)]
pub struct CatchUpHandle {
    target: watch::Sender<u32>,
    progress: Arc<Notify>,
}

impl CatchUpHandle {
    /// `false` once the task has exited.
    pub fn is_running(&self) -> bool {
        !self.target.is_closed()
    }

    /// Raise the height the task is chasing. Lower values are ignored.
    pub fn raise_target(&self, height: u32) {
        self.target.send_if_modified(|current| {
            if height > *current {
                *current = height;
                true
            } else {
                false
            }
        });
    }

    pub fn target(&self) -> u32 {
        *self.target.borrow()
    }

    /// Wake the task early: a batch from this peer was just applied.
    pub fn notify_progress(&self) {
        self.progress.notify_one();
    }
}

/// Start chasing `target` using blocks from `peer`.
pub fn spawn_catch_up(
    peer: SocketAddr,
    target: u32,
    chain: Arc<Chain>,
    peers: PeerSet,
    config: CatchUpConfig,
    shutdown: watch::Receiver<bool>,
) -> CatchUpHandle {
    let (target_tx, target_rx) = watch::channel(target);
    let progress = Arc::new(Notify::new());
    tokio::spawn(catch_up_loop(
        peer,
        chain,
        peers,
        config,
        target_rx,
        Arc::clone(&progress),
        shutdown,
    ));
    CatchUpHandle {
        target: target_tx,
        progress,
    }
}

async fn catch_up_loop(
    peer: SocketAddr,
    chain: Arc<Chain>,
    peers: PeerSet,
    config: CatchUpConfig,
    mut target: watch::Receiver<u32>,
    progress: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut best_height = chain.height();
    let mut stalled = 0u32;
    info!(%peer, local = best_height, target = *target.borrow(), "catch-up started");

    loop {
        let local = chain.height();
        let goal = *target.borrow();
        if local >= goal {
            info!(%peer, height = local, "caught up");
            return;
        }

        if local > best_height {
            best_height = local;
            stalled = 0;
        } else if stalled >= config.max_stalled_rounds {
            warn!(%peer, height = local, target = goal, "catch-up stalled, giving up");
            return;
        }

        let request = Message::GetBlocks(GetBlocksMessage {
            from: local + 1,
            to: 0,
        });
        match request.encode() {
            Ok(frame) => match peers.send(&peer, frame) {
                Ok(()) => debug!(%peer, from = local + 1, "requested blocks"),
                Err(TransportError::PeerUnknown(_)) => {
                    info!(%peer, "catch-up peer gone");
                    return;
                }
                Err(e) => warn!(%peer, error = %e, "block request not sent"),
            },
            Err(e) => {
                warn!(error = %e, "failed to encode GetBlocks");
                return;
            }
        }
        stalled += 1;

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = progress.notified() => {}
            changed = target.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_BLOCK_BYTES, MAX_FRAME_LENGTH};
    use crate::crypto::Keypair;
    use crate::network::message::BlocksMessage;
    use crate::network::transport::PeerHandle;
    use crate::transaction::Transaction;

    fn chain_with(n: u32) -> Chain {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        for _ in 0..n {
            let mut block = Block::from_prev_header(&chain.tip_header(), vec![]);
            block.sign(&kp);
            chain.add_block(block).unwrap();
        }
        chain
    }

    fn heights(blocks: &[Block]) -> Vec<u32> {
        blocks.iter().map(Block::height).collect()
    }

    #[test]
    fn open_ended_request_includes_tip() {
        let chain = chain_with(3);
        let blocks = collect_blocks(&chain, GetBlocksMessage { from: 1, to: 0 });
        assert_eq!(heights(&blocks), vec![1, 2, 3]);
    }

    #[test]
    fn bounded_request_is_half_open() {
        let chain = chain_with(5);
        let blocks = collect_blocks(&chain, GetBlocksMessage { from: 2, to: 4 });
        assert_eq!(heights(&blocks), vec![2, 3]);
    }

    #[test]
    fn request_past_tip_is_empty() {
        let chain = chain_with(2);
        assert!(collect_blocks(&chain, GetBlocksMessage { from: 3, to: 0 }).is_empty());
    }

    #[test]
    fn reply_of_large_blocks_fits_in_one_frame() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        // Four blocks of just under 3 MiB each: together well past a frame.
        for i in 0..4u8 {
            let mut tx = Transaction::new(vec![b'a' + i; 3 * 1024 * 1024]);
            tx.sign(&kp);
            let mut block = Block::from_prev_header(&chain.tip_header(), vec![tx]);
            block.sign(&kp);
            assert!(block.encoded_len() <= MAX_BLOCK_BYTES);
            chain.add_block(block).unwrap();
        }

        let first = collect_blocks(&chain, GetBlocksMessage { from: 1, to: 0 });
        assert_eq!(heights(&first), vec![1, 2]);
        let frame = Message::Blocks(BlocksMessage { blocks: first }).encode().unwrap();
        assert!(frame.len() <= MAX_FRAME_LENGTH);

        // The requester continues from where the short reply stopped.
        let rest = collect_blocks(&chain, GetBlocksMessage { from: 3, to: 0 });
        assert_eq!(heights(&rest), vec![3, 4]);
    }

    #[tokio::test]
    async fn silent_peer_gets_exactly_max_stalled_requests() {
        let chain = Arc::new(chain_with(0));
        let peers = PeerSet::new();
        let addr: SocketAddr = "127.0.0.1:7100".parse().unwrap();
        let (sender, mut requests) = tokio::sync::mpsc::channel(16);
        peers.insert(PeerHandle::for_test(addr, sender));

        let (_tx, shutdown) = watch::channel(false);
        let config = CatchUpConfig {
            interval: Duration::from_millis(10),
            max_stalled_rounds: 3,
        };
        let handle = spawn_catch_up(addr, 5, chain, peers, config, shutdown);
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut sent = 0;
        while let Ok(frame) = requests.try_recv() {
            assert!(matches!(
                Message::decode(&frame).unwrap(),
                Message::GetBlocks(GetBlocksMessage { from: 1, to: 0 })
            ));
            sent += 1;
        }
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn already_caught_up_exits_immediately() {
        let chain = Arc::new(chain_with(2));
        let (_tx, shutdown) = watch::channel(false);
        let handle = spawn_catch_up(
            "127.0.0.1:1".parse().unwrap(),
            2,
            chain,
            PeerSet::new(),
            CatchUpConfig::default(),
            shutdown,
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_peer_ends_catch_up() {
        let chain = Arc::new(chain_with(0));
        let (_tx, shutdown) = watch::channel(false);
        let handle = spawn_catch_up(
            "127.0.0.1:1".parse().unwrap(),
            10,
            chain,
            PeerSet::new(),
            CatchUpConfig::default(),
            shutdown,
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn raise_target_only_goes_up() {
        let chain = Arc::new(chain_with(0));
        let (_tx, shutdown) = watch::channel(false);
        let handle = spawn_catch_up(
            "127.0.0.1:1".parse().unwrap(),
            5,
            chain,
            PeerSet::new(),
            CatchUpConfig::default(),
            shutdown,
        );
        handle.raise_target(9);
        handle.raise_target(3);
        assert_eq!(handle.target(), 9);
    }
}
