//! # Contract State
//!
//! Key/value store written by the VM. Keys are raw byte strings packed by
//! the program; values are whatever the program stored (today always an
//! 8-byte little-endian `i64`).
//!
//! The chain never mutates the live state directly while applying a block.
//! It clones the state, lets the VM run every transaction against the
//! clone, and swaps the clone in only once the block is committed.

use std::collections::{BTreeMap, HashMap};

use crate::crypto::{sha256_parts, Hash};

// ---------------------------------------------------------------------------
// ContractState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractState {
    entries: HashMap<Vec<u8>, Vec<u8>>,
}

impl ContractState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    /// Read a value stored as a little-endian `i64`. `None` if the key is
    /// missing or the value is not exactly 8 bytes.
    pub fn get_int(&self, key: &[u8]) -> Option<i64> {
        let bytes: [u8; 8] = self.get(key)?.try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }

    pub fn put_int(&mut self, key: Vec<u8>, value: i64) {
        self.put(key, value.to_le_bytes().to_vec());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Digest of the whole state, independent of insertion order.
    ///
    /// Entries are sorted by key and hashed as
    /// `len(key) || key || len(value) || value` so that no two distinct
    /// states share a preimage. The empty state hashes to the zero hash.
    pub fn root_hash(&self) -> Hash {
        if self.entries.is_empty() {
            return Hash::zero();
        }
        let sorted: BTreeMap<&Vec<u8>, &Vec<u8>> = self.entries.iter().collect();
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(sorted.len() * 4);
        for (k, v) in sorted {
            parts.push((k.len() as u64).to_le_bytes().to_vec());
            parts.push(k.clone());
            parts.push((v.len() as u64).to_le_bytes().to_vec());
            parts.push(v.clone());
        }
        sha256_parts(parts.iter().map(Vec::as_slice))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
