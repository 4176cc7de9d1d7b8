//! # Query Views
//!
//! JSON shapes served by the HTTP façade, and the lookups that build them.
//! The HTTP server itself lives in the node binary (axum); this module
//! stays transport-agnostic so the views can be tested against a bare
//! [`Chain`].
//!
//! | Lookup              | Accepts                         | Returns            |
//! |---------------------|---------------------------------|--------------------|
//! | [`block_view`]      | decimal height or hex hash      | [`BlockView`]      |
//! | [`transaction_view`]| hex transaction hash            | [`TransactionView`]|

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Hash;
use crate::storage::{Block, Chain};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub hash: String,
    pub version: u32,
    pub data_hash: String,
    pub prev_block_hash: String,
    pub height: u32,
    pub timestamp: i64,
    /// Producer address, empty for the unsigned genesis block.
    pub validator: String,
    pub signature: String,
    pub tx_count: usize,
    /// Transaction hashes in block order.
    pub hashes: Vec<String>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            hash: block.hash().to_hex(),
            version: block.header.version,
            data_hash: block.header.data_hash.to_hex(),
            prev_block_hash: block.header.prev_block_hash.to_hex(),
            height: block.header.height,
            timestamp: block.header.timestamp,
            validator: block
                .validator
                .map(|pk| pk.address().to_hex())
                .unwrap_or_default(),
            signature: block
                .signature
                .as_ref()
                .map(|s| s.to_hex())
                .unwrap_or_default(),
            tx_count: block.tx_count(),
            hashes: block
                .transactions
                .iter()
                .map(|tx| tx.hash().to_hex())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub hash: String,
    pub nonce: i64,
    /// Hex-encoded payload.
    pub data: String,
    pub from: String,
    pub signature: String,
    pub block_height: u32,
}

impl TransactionView {
    pub fn new(tx: &Transaction, block_height: u32) -> Self {
        Self {
            hash: tx.hash().to_hex(),
            nonce: tx.nonce,
            data: hex::encode(&tx.data),
            from: tx.from.map(|pk| pk.address().to_hex()).unwrap_or_default(),
            signature: tx
                .signature
                .as_ref()
                .map(|s| s.to_hex())
                .unwrap_or_default(),
            block_height,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// A string of decimal digits is a height; anything else must be a hex hash.
pub fn block_view(chain: &Chain, id: &str) -> Result<BlockView, QueryError> {
    let block = if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        let height: u32 = id
            .parse()
            .map_err(|_| QueryError::BadRequest(format!("height out of range: {id}")))?;
        chain.get_block_by_height(height)
    } else {
        let hash: Hash = id
            .parse()
            .map_err(|_| QueryError::BadRequest(format!("not a height or block hash: {id}")))?;
        chain.get_block_by_hash(&hash)
    }
    .map_err(|e| QueryError::NotFound(e.to_string()))?;

    Ok(BlockView::from(block.as_ref()))
}

pub fn transaction_view(chain: &Chain, hash: &str) -> Result<TransactionView, QueryError> {
    let hash: Hash = hash
        .parse()
        .map_err(|_| QueryError::BadRequest(format!("not a transaction hash: {hash}")))?;
    let (tx, height) = chain
        .get_transaction(&hash)
        .map_err(|e| QueryError::NotFound(e.to_string()))?;
    Ok(TransactionView::new(&tx, height))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
