//! # Chain
//!
//! The locally replicated, append-only sequence of blocks from genesis to
//! tip, plus the indexes the rest of the node reads from:
//!
//! ```text
//! headers / blocks   by height (Vec index == height)
//! by_hash            block hash -> height
//! tx_index           tx hash    -> (height, position)
//! contract_state     VM key/value state after the tip
//! ```
//!
//! All of it sits behind one `parking_lot::RwLock`. Readers take the shared
//! lock; [`Chain::add_block`] holds the exclusive lock across validation,
//! execution, persistence and append, so two concurrent appends can never
//! both pass validation against the same tip.
//!
//! ## Two-phase apply
//!
//! Transactions run against a clone of the contract state. If any of them
//! fails, or the store rejects the block, the clone is dropped and nothing
//! observable changes. The clone replaces the live state only after the
//! block has been appended.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use super::block::{Block, Header};
use super::state::ContractState;
use super::store::{BlockStore, MemStore, StoreError};
use super::validator::BlockValidator;
use crate::crypto::Hash;
use crate::transaction::{Transaction, VerifyError};
use crate::vm::{Executor, Vm, VmError};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("block at height {height} already exists")]
    AlreadyExists { height: u32 },

    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u32, got: u32 },

    #[error("block {height} does not extend the current tip")]
    PrevHashMismatch { height: u32 },

    #[error("block {height} encodes to {size} bytes, limit is {limit}")]
    TooLarge { height: u32, size: usize, limit: usize },

    #[error("block {height} data hash does not match its transactions")]
    DataHashMismatch { height: u32 },

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("transaction {index} failed to execute: {source}")]
    Execution {
        index: usize,
        #[source]
        source: VmError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

struct ChainInner {
    headers: Vec<Header>,
    blocks: Vec<Arc<Block>>,
    by_hash: HashMap<Hash, u32>,
    tx_index: HashMap<Hash, (u32, usize)>,
    contract_state: ContractState,
}

impl ChainInner {
    fn tip(&self) -> &Header {
        // Never empty: construction always inserts genesis.
        &self.headers[self.headers.len() - 1]
    }

    fn append(&mut self, block: Block) {
        let height = block.header.height;
        self.by_hash.insert(block.hash(), height);
        for (pos, tx) in block.transactions.iter().enumerate() {
            self.tx_index.insert(tx.hash(), (height, pos));
        }
        self.headers.push(block.header.clone());
        self.blocks.push(Arc::new(block));
    }
}

pub struct Chain {
    inner: RwLock<ChainInner>,
    validator: BlockValidator,
    store: Box<dyn BlockStore>,
    executor: Box<dyn Executor>,
}

impl Chain {
    /// Chain rooted at `genesis`, backed by a [`MemStore`] and the default
    /// [`Vm`]. Genesis is inserted as-is, without validation.
    pub fn new(genesis: Block) -> Self {
        Self::with_parts(genesis, Box::new(MemStore::new()), Box::new(Vm::new()))
    }

    pub fn with_parts(
        genesis: Block,
        store: Box<dyn BlockStore>,
        executor: Box<dyn Executor>,
    ) -> Self {
        let mut inner = ChainInner {
            headers: Vec::new(),
            blocks: Vec::new(),
            by_hash: HashMap::new(),
            tx_index: HashMap::new(),
            contract_state: ContractState::new(),
        };
        info!(hash = %genesis.hash(), "chain initialized from genesis");
        inner.append(genesis);
        Self {
            inner: RwLock::new(inner),
            validator: BlockValidator::new(),
            store,
            executor,
        }
    }

    /// Height of the tip. Genesis is 0.
    pub fn height(&self) -> u32 {
        self.inner.read().tip().height
    }

    pub fn has_block(&self, height: u32) -> bool {
        height <= self.height()
    }

    pub fn tip_header(&self) -> Header {
        self.inner.read().tip().clone()
    }

    pub fn get_header(&self, height: u32) -> Result<Header, ChainError> {
        self.inner
            .read()
            .headers
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("header at height {height}")))
    }

    pub fn get_block_by_height(&self, height: u32) -> Result<Arc<Block>, ChainError> {
        self.inner
            .read()
            .blocks
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block at height {height}")))
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, ChainError> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(hash)
            .and_then(|h| inner.blocks.get(*h as usize))
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {hash}")))
    }

    /// A committed transaction and the height of the block that holds it.
    pub fn get_transaction(&self, hash: &Hash) -> Result<(Transaction, u32), ChainError> {
        let inner = self.inner.read();
        inner
            .tx_index
            .get(hash)
            .and_then(|(height, pos)| {
                let block = inner.blocks.get(*height as usize)?;
                Some((block.transactions.get(*pos)?.clone(), *height))
            })
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))
    }

    /// Blocks with height in `[from, to)`, clipped to the chain, at most
    /// `limit` of them.
    pub fn blocks_in_range(&self, from: u32, to: u32, limit: usize) -> Vec<Arc<Block>> {
        let inner = self.inner.read();
        let end = (to as usize).min(inner.blocks.len());
        let start = (from as usize).min(end);
        inner.blocks[start..end].iter().take(limit).cloned().collect()
    }

    /// Snapshot of the contract state at the tip.
    pub fn contract_state(&self) -> ContractState {
        self.inner.read().contract_state.clone()
    }

    pub fn state_root(&self) -> Hash {
        self.inner.read().contract_state.root_hash()
    }

    /// Validate, execute, persist and append `block`.
    ///
    /// On any error the chain, its indexes and the contract state are
    /// exactly as they were before the call.
    pub fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut inner = self.inner.write();

        self.validator.validate(inner.tip(), &block)?;

        let mut staged = inner.contract_state.clone();
        for (index, tx) in block.transactions.iter().enumerate() {
            self.executor
                .execute(&tx.data, &mut staged)
                .map_err(|source| ChainError::Execution { index, source })?;
        }

        self.store.put(&block)?;

        let height = block.header.height;
        let hash = block.hash();
        let tx_count = block.tx_count();
        inner.append(block);
        inner.contract_state = staged;

        debug!(height, %hash, tx_count, "block appended");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    const PUSH_INT: u8 = 0x0a;
    const PUSH_BYTE: u8 = 0x0b;
    const PACK: u8 = 0x10;
    const STORE: u8 = 0x20;
    const ADD: u8 = 0x30;

    fn signed_tx(data: Vec<u8>) -> Transaction {
        let mut tx = Transaction::new(data);
        tx.sign(&Keypair::generate());
        tx
    }

    fn next_block(chain: &Chain, kp: &Keypair, txs: Vec<Transaction>) -> Block {
        let mut block = Block::from_prev_header(&chain.tip_header(), txs);
        block.sign(kp);
        block
    }

    /// `value -> key` where key is a single byte.
    fn store_program(key: u8, value: u8) -> Vec<u8> {
        vec![value, PUSH_INT, key, PUSH_BYTE, 1, PUSH_INT, PACK, STORE]
    }

    struct FailingStore;

    impl BlockStore for FailingStore {
        fn put(&self, block: &Block) -> Result<(), StoreError> {
            Err(StoreError::Persist {
                height: block.header.height,
                reason: "disk full".into(),
            })
        }
    }

    // -- 1. Construction -----------------------------------------------------

    #[test]
    fn new_chain_has_genesis_only() {
        let genesis = Block::genesis();
        let chain = Chain::new(genesis.clone());
        assert_eq!(chain.height(), 0);
        assert!(chain.has_block(0));
        assert!(!chain.has_block(1));
        assert_eq!(chain.get_block_by_hash(&genesis.hash()).unwrap().height(), 0);
    }

    // -- 2. Appending --------------------------------------------------------

    #[test]
    fn add_block_advances_tip_and_indexes() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        let tx = signed_tx(b"plain-data".to_vec());
        let tx_hash = tx.hash();
        let block = next_block(&chain, &kp, vec![tx]);
        let hash = block.hash();

        chain.add_block(block).unwrap();

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.get_block_by_hash(&hash).unwrap().height(), 1);
        assert_eq!(chain.get_header(1).unwrap().hash(), hash);
        let (found, height) = chain.get_transaction(&tx_hash).unwrap();
        assert_eq!(found.hash(), tx_hash);
        assert_eq!(height, 1);
    }

    #[test]
    fn linkage_holds_for_every_height() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        for _ in 0..5 {
            chain.add_block(next_block(&chain, &kp, vec![])).unwrap();
        }
        for h in 1..=5 {
            let prev = chain.get_header(h - 1).unwrap();
            assert_eq!(chain.get_header(h).unwrap().prev_block_hash, prev.hash());
        }
    }

    #[test]
    fn duplicate_block_rejected() {
        let chain = Chain::new(Block::genesis());
        let block = next_block(&chain, &Keypair::generate(), vec![]);
        chain.add_block(block.clone()).unwrap();
        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::AlreadyExists { height: 1 })
        ));
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn competing_block_at_existing_height_rejected() {
        let chain = Chain::new(Block::genesis());
        let genesis = chain.tip_header();
        let ours = next_block(&chain, &Keypair::generate(), vec![]);
        chain.add_block(ours.clone()).unwrap();

        let mut theirs = Block::from_prev_header(&genesis, vec![signed_tx(b"other".to_vec())]);
        theirs.sign(&Keypair::generate());
        assert_ne!(theirs.hash(), ours.hash());

        assert!(matches!(
            chain.add_block(theirs),
            Err(ChainError::AlreadyExists { height: 1 })
        ));
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.tip_header().hash(), ours.hash());
    }

    #[test]
    fn gap_rejected_without_mutation() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        let b1 = next_block(&chain, &kp, vec![]);
        let mut b2 = Block::from_prev_header(&b1.header, vec![]);
        b2.sign(&kp);
        assert!(matches!(
            chain.add_block(b2),
            Err(ChainError::HeightMismatch { expected: 1, got: 2 })
        ));
        assert_eq!(chain.height(), 0);
    }

    // -- 3. Lookups ----------------------------------------------------------

    #[test]
    fn unknown_lookups_are_not_found() {
        let chain = Chain::new(Block::genesis());
        assert!(matches!(chain.get_header(3), Err(ChainError::NotFound(_))));
        assert!(matches!(
            chain.get_block_by_hash(&Hash::from_bytes([9u8; 32])),
            Err(ChainError::NotFound(_))
        ));
        assert!(matches!(
            chain.get_transaction(&Hash::zero()),
            Err(ChainError::NotFound(_))
        ));
    }

    #[test]
    fn blocks_in_range_clips_and_limits() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        for _ in 0..4 {
            chain.add_block(next_block(&chain, &kp, vec![])).unwrap();
        }
        let heights = |v: Vec<Arc<Block>>| v.iter().map(|b| b.height()).collect::<Vec<_>>();
        assert_eq!(heights(chain.blocks_in_range(1, 3, 100)), vec![1, 2]);
        assert_eq!(heights(chain.blocks_in_range(2, 100, 100)), vec![2, 3, 4]);
        assert_eq!(heights(chain.blocks_in_range(1, 100, 2)), vec![1, 2]);
        assert!(chain.blocks_in_range(9, 12, 100).is_empty());
        assert!(chain.blocks_in_range(3, 1, 100).is_empty());
    }

    // -- 4. Execution --------------------------------------------------------

    #[test]
    fn transactions_update_contract_state() {
        let chain = Chain::new(Block::genesis());
        let tx = signed_tx(store_program(b'a', 7));
        chain
            .add_block(next_block(&chain, &Keypair::generate(), vec![tx]))
            .unwrap();
        assert_eq!(chain.contract_state().get_int(b"a"), Some(7));
        assert!(!chain.state_root().is_zero());
    }

    #[test]
    fn failed_execution_leaves_everything_untouched() {
        let chain = Chain::new(Block::genesis());
        let kp = Keypair::generate();
        let good = signed_tx(store_program(b'a', 7));
        let bad = signed_tx(vec![ADD]);
        let block = next_block(&chain, &kp, vec![good.clone(), bad]);

        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::Execution { index: 1, .. })
        ));
        assert_eq!(chain.height(), 0);
        assert!(chain.contract_state().is_empty());
        assert!(chain.get_transaction(&good.hash()).is_err());
    }

    #[test]
    fn store_failure_leaves_everything_untouched() {
        let chain = Chain::with_parts(Block::genesis(), Box::new(FailingStore), Box::new(Vm::new()));
        let tx = signed_tx(store_program(b'a', 7));
        let block = next_block(&chain, &Keypair::generate(), vec![tx]);
        assert!(matches!(chain.add_block(block), Err(ChainError::Store(_))));
        assert_eq!(chain.height(), 0);
        assert!(chain.contract_state().is_empty());
    }

    // -- 5. Concurrency ------------------------------------------------------

    #[test]
    fn concurrent_appends_at_same_height_admit_one() {
        let chain = Arc::new(Chain::new(Block::genesis()));
        let tip = chain.tip_header();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let chain = Arc::clone(&chain);
                let tip = tip.clone();
                std::thread::spawn(move || {
                    let mut block = Block::from_prev_header(&tip, vec![]);
                    block.sign(&Keypair::generate());
                    chain.add_block(block).is_ok()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(chain.height(), 1);
    }
}
