//! Persistence sink for committed blocks.
//!
//! The chain hands every block it accepts to a [`BlockStore`] before making
//! it visible. The in-memory chain is the source of truth, so the default
//! [`MemStore`] simply discards what it is given.

use thiserror::Error;

use super::block::Block;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist block {height}: {reason}")]
    Persist { height: u32, reason: String },
}

/// Sink for committed blocks.
pub trait BlockStore: Send + Sync {
    fn put(&self, block: &Block) -> Result<(), StoreError>;
}

/// No-op store.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemStore;

impl MemStore {
    pub fn new() -> Self {
        Self
    }
}

impl BlockStore for MemStore {
    fn put(&self, _block: &Block) -> Result<(), StoreError> {
        Ok(())
    }
}
