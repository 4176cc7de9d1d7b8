// Copyright (c) 2026 Strata Contributors. MIT License.
// See LICENSE for details.

//! # Strata — Core Library
//!
//! A small replicated block chain: nodes keep an append-only chain of
//! signed blocks, accept signed transactions, produce blocks on a timer
//! when they hold a producer key, and catch up with peers that are ahead.
//!
//! ## Architecture
//!
//! - **crypto** — Ed25519 keys and signatures, SHA-256 hashes.
//! - **transaction** — Transaction type, signing and verification.
//! - **storage** — Blocks, the chain, block validation, contract state.
//! - **vm** — Byte-code stack machine run over every committed transaction.
//! - **network** — TCP transport, wire messages, pool, producer, catch-up,
//!   and the node event loop.
//! - **config** — Protocol constants.
//!
//! ## Ground Rules
//!
//! 1. Every block on the chain extends the previous tip; there is no fork
//!    choice.
//! 2. A failed `add_block` changes nothing observable.
//! 3. Bad input from the network is logged and dropped, never fatal.

pub mod config;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod transaction;
pub mod vm;
