//! # Protocol Configuration & Constants
//!
//! Every tunable number in Strata lives here. Node-level knobs that an
//! operator may override (listen address, block time, seeds) live in
//! [`crate::network::NodeConfig`]; the values below are the defaults and the
//! hard protocol limits that all peers must agree on.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version stamped into every block header produced by this build.
pub const BLOCK_VERSION: u32 = 1;

/// Version advertised in `Status` replies.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// SHA-256 digest length.
pub const HASH_LENGTH: usize = 32;

/// Addresses are the trailing 20 bytes of SHA-256(public key).
pub const ADDRESS_LENGTH: usize = 20;

/// Upper bound (exclusive) of the random transaction nonce.
pub const MAX_TX_NONCE: i64 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Block Production
// ---------------------------------------------------------------------------

/// Default interval between produced blocks.
pub const DEFAULT_BLOCK_TIME: Duration = Duration::from_secs(5);

/// Default capacity of the transaction pool.
pub const DEFAULT_POOL_CAPACITY: usize = 1_000;

/// Largest encoded block a producer may build or a node may accept. Half a
/// frame, so any single block always fits in a `Blocks` reply.
pub const MAX_BLOCK_BYTES: usize = MAX_FRAME_LENGTH / 2;

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// Largest frame a peer may send us. Anything bigger is a protocol error.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Deadline for a single framed write to a peer socket.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth per peer.
pub const PEER_SEND_QUEUE: usize = 256;

/// Capacity of the inbound RPC channel feeding the node event loop.
pub const RPC_CHANNEL_CAPACITY: usize = 1_024;

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// How often a lagging node re-asks a peer for blocks.
pub const CATCH_UP_INTERVAL: Duration = Duration::from_secs(3);

/// Catch-up gives up after this many rounds without any height progress.
pub const MAX_STALLED_ROUNDS: u32 = 10;

/// Cap on blocks returned in a single `Blocks` reply.
pub const MAX_BLOCKS_PER_RESPONSE: usize = 500;

/// Encoded size budget for the blocks of a single `Blocks` reply. Leaves
/// room under `MAX_FRAME_LENGTH` for the message tag and vector length.
pub const MAX_RESPONSE_BYTES: usize = MAX_FRAME_LENGTH - 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_sane() {
        assert!(MAX_FRAME_LENGTH > SIGNATURE_LENGTH + HASH_LENGTH);
        assert!(ADDRESS_LENGTH < HASH_LENGTH);
        assert!(CATCH_UP_INTERVAL < DEFAULT_BLOCK_TIME * 10);
        assert!(MAX_BLOCKS_PER_RESPONSE > 0);
        assert!(MAX_BLOCK_BYTES <= MAX_RESPONSE_BYTES);
        assert!(MAX_RESPONSE_BYTES < MAX_FRAME_LENGTH);
    }
}
