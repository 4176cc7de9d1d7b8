//! # Network Module
//!
//! Peer-to-peer replication and the node runtime.
//!
//! ## Architecture
//!
//! ```text
//! transport.rs — TCP listener/dialer, framed peer tasks, PeerSet registry
//! message.rs   — one-byte tagged wire messages (bincode payloads)
//! mempool.rs   — arrival-ordered transaction pool
//! producer.rs  — timed block production on keyed nodes
//! sync.rs      — Status/GetBlocks/Blocks catch-up
//! node.rs      — Node event loop, NodeConfig, NodeHandle
//! rpc.rs       — JSON views for the HTTP façade
//! ```
//!
//! ## Design Decisions
//!
//! - No fork choice. A block is accepted only if it extends our tip; a peer
//!   that is ahead is caught up with, never reorganized against.
//! - Peer registry and pool use `parking_lot` locks that are never held
//!   across an `.await`. All outbound traffic goes through per-peer bounded
//!   queues drained by a write task.
//! - Every spawned task watches one shared `watch` shutdown channel.

pub mod mempool;
pub mod message;
pub mod node;
pub mod producer;
pub mod rpc;
pub mod sync;
pub mod transport;

pub use mempool::{PoolError, TxPool};
pub use message::{
    decode_rpc, BlocksMessage, CodecError, DecodedMessage, GetBlocksMessage, Message,
    MessageKind, Rpc, StatusMessage,
};
pub use node::{Node, NodeConfig, NodeError, NodeHandle};
pub use producer::{BlockProducer, BlockProductionError};
pub use rpc::{block_view, transaction_view, BlockView, QueryError, TransactionView};
pub use sync::{collect_blocks, CatchUpConfig, CatchUpHandle};
pub use transport::{Connector, PeerEvent, PeerHandle, PeerSet, TcpTransport, TransportError};
