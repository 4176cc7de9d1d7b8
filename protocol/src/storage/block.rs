//! # Block Structure
//!
//! A block is the unit of replication: an ordered list of transactions,
//! a header linking it to its parent, and the producer's signature.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Header                                     │
//! │  ├── version: u32                           │
//! │  ├── height: u32           (genesis = 0)    │
//! │  ├── prev_block_hash: Hash                  │
//! │  ├── data_hash: Hash       (tx commitment)  │
//! │  └── timestamp: i64        (unix nanos)     │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>             │
//! ├─────────────────────────────────────────────┤
//! │  validator: Option<PublicKey>               │
//! │  signature: Option<Signature>               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block hash is SHA-256 over the little-endian header preimage
//! `version || height || prev_block_hash || data_hash || timestamp`.
//! Producer identity and signature sit outside the header, so signing
//! does not change the hash. The producer signs the hash itself.
//!
//! ## Data Hash
//!
//! `data_hash` is SHA-256 over the concatenated transaction hashes in block
//! order. The empty list commits to SHA-256 of the empty string.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::BLOCK_VERSION;
use crate::crypto::{sha256, sha256_parts, Hash, Keypair, PublicKey, Signature};
use crate::transaction::{Transaction, VerifyError};

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub height: u32,
    pub prev_block_hash: Hash,
    pub data_hash: Hash,
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
}

impl Header {
    /// Deterministic little-endian encoding hashed by [`Header::hash`].
    pub fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + 32 + 32 + 8);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(self.data_hash.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    pub fn hash(&self) -> Hash {
        sha256(&self.bytes())
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header, transactions and (once signed) the producer's key
/// and signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub validator: Option<PublicKey>,
    pub signature: Option<Signature>,
}

impl Block {
    /// Unsigned block around an existing header.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            validator: None,
            signature: None,
        }
    }

    /// The shared genesis block. Every node must build the identical block,
    /// so nothing here depends on the clock or on a key.
    pub fn genesis() -> Self {
        Self::new(
            Header {
                version: BLOCK_VERSION,
                height: 0,
                prev_block_hash: Hash::zero(),
                data_hash: compute_data_hash(&[]),
                timestamp: 0,
            },
            Vec::new(),
        )
    }

    /// Successor of `prev` carrying `transactions`, stamped with the current
    /// time and the matching data hash. Left unsigned.
    pub fn from_prev_header(prev: &Header, transactions: Vec<Transaction>) -> Self {
        let header = Header {
            version: BLOCK_VERSION,
            height: prev.height + 1,
            prev_block_hash: prev.hash(),
            data_hash: compute_data_hash(&transactions),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        };
        Self::new(header, transactions)
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Size of the block's bincode encoding, as carried inside a `Block` or
    /// `Blocks` message.
    pub fn encoded_len(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |n| n as usize)
    }

    /// Sign the header hash and record the producer key.
    pub fn sign(&mut self, keypair: &Keypair) {
        let hash = self.hash();
        self.signature = Some(keypair.sign(hash.as_bytes()));
        self.validator = Some(keypair.public_key());
    }

    /// Check the producer signature over the header hash, then every
    /// contained transaction in order.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let (Some(validator), Some(signature)) = (&self.validator, &self.signature) else {
            return Err(VerifyError::Unsigned);
        };
        if !validator.verify(self.hash().as_bytes(), signature) {
            return Err(VerifyError::SignatureInvalid);
        }
        for (index, tx) in self.transactions.iter().enumerate() {
            tx.verify().map_err(|e| VerifyError::Transaction {
                index,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}

/// SHA-256 over the concatenated hashes of `transactions`.
pub fn compute_data_hash(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    sha256_parts(hashes.iter().map(|h| h.as_bytes().as_slice()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_tx(data: &[u8]) -> Transaction {
        let mut tx = Transaction::new(data.to_vec());
        tx.sign(&Keypair::generate());
        tx
    }

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::genesis();
        assert_eq!(genesis.height(), 0);
        assert!(genesis.header.prev_block_hash.is_zero());
        assert_eq!(genesis.header.timestamp, 0);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.signature.is_none());
        assert_eq!(genesis.header.data_hash, sha256(b""));
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        assert_eq!(Block::genesis().hash(), Block::genesis().hash());
    }

    #[test]
    fn header_bytes_layout() {
        let header = Block::genesis().header;
        let bytes = header.bytes();
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[0..4], &BLOCK_VERSION.to_le_bytes());
        assert_eq!(&bytes[4..8], &0u32.to_le_bytes());
    }

    #[test]
    fn from_prev_header_links_to_parent() {
        let genesis = Block::genesis();
        let block = Block::from_prev_header(&genesis.header, vec![signed_tx(b"a")]);
        assert_eq!(block.height(), 1);
        assert_eq!(block.header.prev_block_hash, genesis.hash());
        assert_eq!(
            block.header.data_hash,
            compute_data_hash(&block.transactions)
        );
    }

    #[test]
    fn signing_does_not_change_hash() {
        let mut block = Block::from_prev_header(&Block::genesis().header, vec![]);
        let before = block.hash();
        block.sign(&Keypair::generate());
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn sign_then_verify() {
        let kp = Keypair::generate();
        let mut block =
            Block::from_prev_header(&Block::genesis().header, vec![signed_tx(b"x"), signed_tx(b"y")]);
        block.sign(&kp);
        assert!(block.verify().is_ok());
        assert_eq!(block.validator, Some(kp.public_key()));
    }

    #[test]
    fn unsigned_block_fails_verify() {
        let block = Block::from_prev_header(&Block::genesis().header, vec![]);
        assert_eq!(block.verify(), Err(VerifyError::Unsigned));
    }

    #[test]
    fn foreign_validator_key_fails_verify() {
        let mut block = Block::from_prev_header(&Block::genesis().header, vec![]);
        block.sign(&Keypair::generate());
        block.validator = Some(Keypair::generate().public_key());
        assert_eq!(block.verify(), Err(VerifyError::SignatureInvalid));
    }

    #[test]
    fn tampered_header_fails_verify() {
        let mut block = Block::from_prev_header(&Block::genesis().header, vec![]);
        block.sign(&Keypair::generate());
        block.header.height = 100;
        assert_eq!(block.verify(), Err(VerifyError::SignatureInvalid));
    }

    #[test]
    fn bad_transaction_is_reported_by_index() {
        let mut unsigned = Transaction::new(b"nope".to_vec());
        unsigned.from = None;
        let mut block = Block::from_prev_header(
            &Block::genesis().header,
            vec![signed_tx(b"ok"), unsigned],
        );
        block.sign(&Keypair::generate());
        match block.verify() {
            Err(VerifyError::Transaction { index: 1, source }) => {
                assert_eq!(*source, VerifyError::Unsigned);
            }
            other => panic!("expected Transaction error, got {other:?}"),
        }
    }

    #[test]
    fn data_hash_depends_on_order() {
        let a = signed_tx(b"a");
        let b = signed_tx(b"b");
        assert_ne!(
            compute_data_hash(&[a.clone(), b.clone()]),
            compute_data_hash(&[b, a])
        );
    }
}
