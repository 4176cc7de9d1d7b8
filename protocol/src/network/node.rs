//! # Node
//!
//! The [`Node`] owns the chain, the transaction pool and the peer registry,
//! and runs the central event loop that ties the transport to them.
//!
//! ```text
//!                ┌────────────── Node::run ───────────────┐
//!  PeerEvent ───►│ Connected → register, ask GetStatus    │
//!                │ Disconnected → drop catch-up           │
//!  Transaction ─►│ verify → pool → gossip                 │
//!  Rpc ─────────►│ decode → process_message               │
//!  shutdown ────►│ stop everything                        │
//!                └────────────────────────────────────────┘
//! ```
//!
//! Other components (the HTTP façade, metrics) talk to a running node via
//! a cloneable [`NodeHandle`].
//!
//! A node with a private key also runs a [`BlockProducer`]. Nodes without
//! one are followers: they relay transactions and replicate blocks.
//!
//! A failed message is logged and dropped. Only binding the listener can
//! fail the node as a whole.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::mempool::{PoolError, TxPool};
use super::message::{
    decode_rpc, BlocksMessage, CodecError, DecodedMessage, GetBlocksMessage, Message, Rpc,
    StatusMessage,
};
use super::producer::BlockProducer;
use super::sync::{collect_blocks, spawn_catch_up, CatchUpConfig, CatchUpHandle};
use super::transport::{Connector, PeerEvent, PeerHandle, PeerSet, TcpTransport, TransportError};
use crate::config::{
    DEFAULT_BLOCK_TIME, DEFAULT_POOL_CAPACITY, PROTOCOL_VERSION, RPC_CHANNEL_CAPACITY,
};
use crate::crypto::Keypair;
use crate::storage::chain::ChainError;
use crate::storage::{Block, Chain};
use crate::transaction::{Transaction, VerifyError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] VerifyError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("node is shut down")]
    Stopped,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Peer-to-peer listen address. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// HTTP façade address. `None` disables the façade.
    pub api_addr: Option<SocketAddr>,
    /// Identifier reported in `Status` replies.
    pub id: String,
    /// Present on producer nodes only.
    pub private_key: Option<Keypair>,
    pub block_time: Duration,
    /// Peers dialed at startup.
    pub seed_nodes: Vec<SocketAddr>,
    pub pool_capacity: usize,
    pub catch_up: CatchUpConfig,
}

impl NodeConfig {
    /// Defaults for everything but the listen address. The id is a fresh
    /// UUID.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            api_addr: None,
            id: uuid::Uuid::new_v4().to_string(),
            private_key: None,
            block_time: DEFAULT_BLOCK_TIME,
            seed_nodes: Vec::new(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            catch_up: CatchUpConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.id.trim().is_empty() {
            return Err(NodeError::Config("node id must not be empty".into()));
        }
        if self.private_key.is_some() && self.block_time.is_zero() {
            return Err(NodeError::Config(
                "block time must be positive on a producer node".into(),
            ));
        }
        if self.pool_capacity == 0 {
            return Err(NodeError::Config("pool capacity must be positive".into()));
        }
        if self.catch_up.interval.is_zero() {
            return Err(NodeError::Config("catch-up interval must be positive".into()));
        }
        Ok(())
    }

    pub fn is_producer(&self) -> bool {
        self.private_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// Cloneable view of a node for the API layer, metrics and tests.
#[derive(Clone)]
pub struct NodeHandle {
    id: String,
    local_addr: SocketAddr,
    chain: Arc<Chain>,
    pool: Arc<TxPool>,
    peers: PeerSet,
    tx_sender: mpsc::Sender<Transaction>,
    connector: Connector,
    shutdown: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bound peer-to-peer address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn height(&self) -> u32 {
        self.chain.height()
    }

    /// Hand a transaction to the node's event loop, as if it had been
    /// submitted locally.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        self.tx_sender.send(tx).await.map_err(|_| NodeError::Stopped)
    }

    /// Dial a peer. The node registers it and asks for its status.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerHandle, NodeError> {
        Ok(self.connector.connect(addr).await?)
    }

    /// Signal every task of this node to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node {
    config: NodeConfig,
    chain: Arc<Chain>,
    pool: Arc<TxPool>,
    peers: PeerSet,
    transport: Option<TcpTransport>,
    connector: Connector,
    local_addr: SocketAddr,
    rpc_rx: mpsc::Receiver<Rpc>,
    events_rx: mpsc::Receiver<PeerEvent>,
    tx_sender: mpsc::Sender<Transaction>,
    tx_rx: mpsc::Receiver<Transaction>,
    shutdown: Arc<watch::Sender<bool>>,
    catch_ups: HashMap<SocketAddr, CatchUpHandle>,
}

impl Node {
    /// Validate the config and bind the listener, with a fresh chain rooted
    /// at the shared genesis block.
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        Self::bind_with_chain(config, Arc::new(Chain::new(Block::genesis()))).await
    }

    pub async fn bind_with_chain(config: NodeConfig, chain: Arc<Chain>) -> Result<Self, NodeError> {
        config.validate()?;

        let (rpc_tx, rpc_rx) = mpsc::channel(RPC_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(RPC_CHANNEL_CAPACITY);
        let (tx_sender, tx_rx) = mpsc::channel(RPC_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let peers = PeerSet::new();
        let connector = Connector::new(peers.clone(), rpc_tx, events_tx, shutdown_rx);
        let transport = TcpTransport::bind(config.listen_addr, connector.clone()).await?;
        let local_addr = transport.local_addr().unwrap_or(config.listen_addr);

        info!(
            id = %config.id,
            %local_addr,
            producer = config.is_producer(),
            height = chain.height(),
            "node bound"
        );

        Ok(Self {
            pool: Arc::new(TxPool::new(config.pool_capacity)),
            config,
            chain,
            peers,
            transport: Some(transport),
            connector,
            local_addr,
            rpc_rx,
            events_rx,
            tx_sender,
            tx_rx,
            shutdown: Arc::new(shutdown_tx),
            catch_ups: HashMap::new(),
        })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            id: self.config.id.clone(),
            local_addr: self.local_addr,
            chain: Arc::clone(&self.chain),
            pool: Arc::clone(&self.pool),
            peers: self.peers.clone(),
            tx_sender: self.tx_sender.clone(),
            connector: self.connector.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the listener, the producer (if keyed) and seed dials, then run
    /// the event loop until shutdown.
    pub async fn run(mut self) -> Result<(), NodeError> {
        if let Some(transport) = self.transport.take() {
            tokio::spawn(transport.run());
        }

        if let Some(keypair) = self.config.private_key.clone() {
            let producer = BlockProducer::new(
                Arc::clone(&self.chain),
                Arc::clone(&self.pool),
                self.peers.clone(),
                keypair,
                self.config.block_time,
            );
            tokio::spawn(producer.run(self.shutdown.subscribe()));
        }

        for seed in self.config.seed_nodes.clone() {
            let connector = self.connector.clone();
            tokio::spawn(async move {
                if let Err(e) = connector.connect(seed).await {
                    warn!(%seed, error = %e, "failed to dial seed node");
                }
            });
        }

        let mut shutdown = self.shutdown.subscribe();
        info!(id = %self.config.id, "node event loop started");

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_peer_event(event),
                Some(tx) = self.tx_rx.recv() => {
                    if let Err(e) = self.process_transaction(None, tx) {
                        warn!(error = %e, "rejected submitted transaction");
                    }
                }
                Some(rpc) = self.rpc_rx.recv() => {
                    let from = rpc.from;
                    if let Err(e) = self.handle_rpc(rpc) {
                        warn!(peer = %from, error = %e, "failed to process message");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.catch_ups.clear();
        info!(id = %self.config.id, height = self.chain.height(), "node stopped");
        Ok(())
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected(peer) => {
                let addr = peer.addr();
                info!(
                    peer = %addr,
                    outbound = peer.is_outbound(),
                    peers = self.peers.len(),
                    "peer registered"
                );
                if let Err(e) = self.send(&addr, &Message::GetStatus) {
                    warn!(peer = %addr, error = %e, "failed to request status");
                }
            }
            PeerEvent::Disconnected(addr) => {
                // The transport already dropped the peer from the set.
                self.catch_ups.remove(&addr);
                info!(peer = %addr, peers = self.peers.len(), "peer removed");
            }
        }
    }

    /// Decode and dispatch one raw frame.
    pub fn handle_rpc(&mut self, rpc: Rpc) -> Result<(), NodeError> {
        let decoded = decode_rpc(&rpc)?;
        self.process_message(decoded)
    }

    pub fn process_message(&mut self, msg: DecodedMessage) -> Result<(), NodeError> {
        let from = msg.from;
        debug!(peer = %from, kind = %msg.message.kind(), "message received");

        match msg.message {
            Message::Tx(tx) => self.process_transaction(Some(from), tx),
            Message::Block(block) => self.process_block(from, block),
            Message::GetStatus => self.process_get_status(from),
            Message::Status(status) => self.process_status(from, status),
            Message::GetBlocks(req) => self.process_get_blocks(from, req),
            Message::Blocks(msg) => self.process_blocks(from, msg),
        }
    }

    fn process_transaction(
        &mut self,
        from: Option<SocketAddr>,
        mut tx: Transaction,
    ) -> Result<(), NodeError> {
        let hash = tx.hash();
        if self.pool.contains(&hash) || self.chain.get_transaction(&hash).is_ok() {
            debug!(tx = %hash, "duplicate transaction ignored");
            return Ok(());
        }

        tx.verify()?;
        tx.set_first_seen(Utc::now().timestamp_nanos_opt().unwrap_or_default());

        if self.pool.add(tx.clone())? {
            debug!(tx = %hash, pool = self.pool.len(), "transaction added to pool");
            let frame = Message::Tx(tx).encode()?;
            self.peers.broadcast(frame, from);
        }
        Ok(())
    }

    fn process_block(&mut self, from: SocketAddr, block: Block) -> Result<(), NodeError> {
        let height = block.height();
        let hash = block.hash();

        match self.chain.add_block(block.clone()) {
            Ok(()) => {
                info!(height, %hash, peer = %from, "accepted block");
                self.prune_pool(&block);
                let frame = Message::Block(block).encode()?;
                self.peers.broadcast(frame, Some(from));
                Ok(())
            }
            Err(ChainError::HeightMismatch { expected, got }) if got > expected => {
                // We are behind this peer; find out how far.
                if let Err(send_err) = self.send(&from, &Message::GetStatus) {
                    debug!(peer = %from, error = %send_err, "status request failed");
                }
                Err(ChainError::HeightMismatch { expected, got }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn process_get_status(&mut self, from: SocketAddr) -> Result<(), NodeError> {
        let status = Message::Status(StatusMessage {
            id: self.config.id.clone(),
            current_height: self.chain.height(),
            version: PROTOCOL_VERSION,
        });
        self.send(&from, &status)
    }

    fn process_status(&mut self, from: SocketAddr, status: StatusMessage) -> Result<(), NodeError> {
        let local = self.chain.height();
        if status.current_height <= local {
            debug!(peer = %from, remote = status.current_height, local, "peer not ahead");
            return Ok(());
        }

        if let Some(handle) = self.catch_ups.get(&from).filter(|h| h.is_running()) {
            handle.raise_target(status.current_height);
            return Ok(());
        }

        info!(
            peer = %from,
            remote_id = %status.id,
            remote = status.current_height,
            local,
            "peer is ahead, starting catch-up"
        );
        let handle = spawn_catch_up(
            from,
            status.current_height,
            Arc::clone(&self.chain),
            self.peers.clone(),
            self.config.catch_up.clone(),
            self.shutdown.subscribe(),
        );
        self.catch_ups.insert(from, handle);
        Ok(())
    }

    fn process_get_blocks(
        &mut self,
        from: SocketAddr,
        req: GetBlocksMessage,
    ) -> Result<(), NodeError> {
        let blocks = collect_blocks(&self.chain, req);
        debug!(peer = %from, from_height = req.from, count = blocks.len(), "serving blocks");
        self.send(&from, &Message::Blocks(BlocksMessage { blocks }))
    }

    fn process_blocks(&mut self, from: SocketAddr, msg: BlocksMessage) -> Result<(), NodeError> {
        let mut applied = 0usize;
        let result = msg
            .blocks
            .into_iter()
            .try_for_each(|block| {
                let hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
                self.chain.add_block(block)?;
                self.pool.remove_many(hashes);
                applied += 1;
                Ok::<(), ChainError>(())
            });

        if applied > 0 {
            info!(peer = %from, applied, height = self.chain.height(), "applied block batch");
            if let Some(handle) = self.catch_ups.get(&from) {
                handle.notify_progress();
            }
        }
        result.map_err(NodeError::from)
    }

    /// Committed transactions no longer belong in the pool.
    fn prune_pool(&self, block: &Block) {
        let removed = self
            .pool
            .remove_many(block.transactions.iter().map(|tx| tx.hash()));
        if removed > 0 {
            debug!(removed, pool = self.pool.len(), "pruned committed transactions");
        }
    }

    fn send(&self, to: &SocketAddr, message: &Message) -> Result<(), NodeError> {
        let frame = message.encode()?;
        Ok(self.peers.send(to, frame)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
