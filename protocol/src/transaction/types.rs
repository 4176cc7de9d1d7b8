//! The [`Transaction`] type.
//!
//! A transaction is an opaque byte payload (contract byte code for the VM)
//! plus a random nonce that keeps otherwise identical payloads apart. The
//! sender's public key and signature are attached by
//! [`Transaction::sign`](super::signing).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MAX_TX_NONCE;
use crate::crypto::{sha256_parts, Hash, PublicKey, Signature};

/// A submitted unit of work.
///
/// `first_seen` is local bookkeeping for pool ordering. It is never put on
/// the wire and never hashed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
    pub nonce: i64,
    pub from: Option<PublicKey>,
    pub signature: Option<Signature>,
    #[serde(skip)]
    first_seen: i64,
}

impl Transaction {
    /// New unsigned transaction with a fresh random nonce in `[0, 10^18)`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self::with_nonce(data, rand::thread_rng().gen_range(0..MAX_TX_NONCE))
    }

    /// New unsigned transaction with a caller-chosen nonce.
    pub fn with_nonce(data: impl Into<Vec<u8>>, nonce: i64) -> Self {
        Self {
            data: data.into(),
            nonce,
            from: None,
            signature: None,
            first_seen: 0,
        }
    }

    /// SHA-256(nonce as 8 little-endian bytes || data).
    ///
    /// Independent of the signature, so signing never changes a
    /// transaction's identity.
    pub fn hash(&self) -> Hash {
        sha256_parts([self.nonce.to_le_bytes().as_slice(), self.data.as_slice()])
    }

    /// Size of the transaction's bincode encoding inside a block.
    pub fn encoded_len(&self) -> usize {
        bincode::serialized_size(self).map_or(usize::MAX, |n| n as usize)
    }

    pub fn is_signed(&self) -> bool {
        self.from.is_some() && self.signature.is_some()
    }

    /// Unix nanoseconds at which this node first accepted the transaction.
    /// Zero until stamped.
    pub fn first_seen(&self) -> i64 {
        self.first_seen
    }

    pub fn set_first_seen(&mut self, nanos: i64) {
        self.first_seen = nanos;
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("hash", &self.hash())
            .field("nonce", &self.nonce)
            .field("data_len", &self.data.len())
            .field("signed", &self.is_signed())
            .finish()
    }
}
