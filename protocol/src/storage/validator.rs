//! # Block Validation
//!
//! [`BlockValidator`] is the acceptance predicate for a candidate block
//! against the current tip. It is pure: it reads the tip header and the
//! block, and never touches chain state. Producing blocks is a separate
//! role (see `network::producer`).
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. height at or below the tip       → `AlreadyExists`
//! 2. height not exactly tip + 1       → `HeightMismatch`
//! 3. parent hash differs from tip     → `PrevHashMismatch`
//! 4. encoding over `MAX_BLOCK_BYTES`  → `TooLarge`
//! 5. producer / transaction signatures → `Verify`
//! 6. data hash does not commit to txs → `DataHashMismatch`

use super::block::{compute_data_hash, Block, Header};
use super::chain::ChainError;
use crate::config::MAX_BLOCK_BYTES;

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockValidator;

impl BlockValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, tip: &Header, block: &Block) -> Result<(), ChainError> {
        let height = block.header.height;

        if height <= tip.height {
            return Err(ChainError::AlreadyExists { height });
        }
        if height != tip.height + 1 {
            return Err(ChainError::HeightMismatch {
                expected: tip.height + 1,
                got: height,
            });
        }
        if block.header.prev_block_hash != tip.hash() {
            return Err(ChainError::PrevHashMismatch { height });
        }
        let size = block.encoded_len();
        if size > MAX_BLOCK_BYTES {
            return Err(ChainError::TooLarge {
                height,
                size,
                limit: MAX_BLOCK_BYTES,
            });
        }

        block.verify()?;

        if compute_data_hash(&block.transactions) != block.header.data_hash {
            return Err(ChainError::DataHashMismatch { height });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash, Keypair};
    use crate::transaction::{Transaction, VerifyError};

    fn signed_child(prev: &Header, kp: &Keypair) -> Block {
        let mut block = Block::from_prev_header(prev, vec![]);
        block.sign(kp);
        block
    }

    #[test]
    fn accepts_valid_successor() {
        let genesis = Block::genesis();
        let block = signed_child(&genesis.header, &Keypair::generate());
        assert!(BlockValidator::new().validate(&genesis.header, &block).is_ok());
    }

    #[test]
    fn rejects_same_height_as_already_exists() {
        let genesis = Block::genesis();
        let kp = Keypair::generate();
        let b1 = signed_child(&genesis.header, &kp);
        let err = BlockValidator::new().validate(&b1.header, &b1).unwrap_err();
        assert!(matches!(err, ChainError::AlreadyExists { height: 1 }));
    }

    #[test]
    fn rejects_gap_as_height_mismatch() {
        let genesis = Block::genesis();
        let kp = Keypair::generate();
        let b1 = signed_child(&genesis.header, &kp);
        let b2 = signed_child(&b1.header, &kp);
        let err = BlockValidator::new()
            .validate(&genesis.header, &b2)
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::HeightMismatch {
                expected: 1,
                got: 2
            }
        ));
    }

    #[test]
    fn rejects_wrong_parent() {
        let genesis = Block::genesis();
        let mut block = Block::from_prev_header(&genesis.header, vec![]);
        block.header.prev_block_hash = Hash::from_bytes([1u8; 32]);
        block.sign(&Keypair::generate());
        let err = BlockValidator::new()
            .validate(&genesis.header, &block)
            .unwrap_err();
        assert!(matches!(err, ChainError::PrevHashMismatch { height: 1 }));
    }

    #[test]
    fn rejects_unsigned() {
        let genesis = Block::genesis();
        let block = Block::from_prev_header(&genesis.header, vec![]);
        let err = BlockValidator::new()
            .validate(&genesis.header, &block)
            .unwrap_err();
        assert!(matches!(err, ChainError::Verify(VerifyError::Unsigned)));
    }

    #[test]
    fn rejects_stale_data_hash() {
        let genesis = Block::genesis();
        let mut block = Block::from_prev_header(&genesis.header, vec![]);
        let mut tx = Transaction::new(b"smuggled".to_vec());
        tx.sign(&Keypair::generate());
        block.transactions.push(tx);
        block.sign(&Keypair::generate());
        let err = BlockValidator::new()
            .validate(&genesis.header, &block)
            .unwrap_err();
        assert!(matches!(err, ChainError::DataHashMismatch { height: 1 }));
    }

    #[test]
    fn rejects_block_over_size_limit() {
        let genesis = Block::genesis();
        let mut tx = Transaction::new(vec![b'a'; MAX_BLOCK_BYTES]);
        tx.sign(&Keypair::generate());
        let mut block = Block::from_prev_header(&genesis.header, vec![tx]);
        block.sign(&Keypair::generate());
        let err = BlockValidator::new()
            .validate(&genesis.header, &block)
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::TooLarge { height: 1, limit: MAX_BLOCK_BYTES, .. }
        ));
    }
}
