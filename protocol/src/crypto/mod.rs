//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations:
//!
//! - **Ed25519** (`ed25519-dalek`) for block and transaction signatures.
//! - **SHA-256** (`sha2`) for every digest on the chain.

pub mod hash;
pub mod keys;

pub use hash::{sha256, sha256_parts, Hash, InvalidHash};
pub use keys::{Address, KeyError, Keypair, PublicKey, Signature};
