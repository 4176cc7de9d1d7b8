//! # Transaction Module
//!
//! ```text
//! types.rs        — Transaction struct and hashing
//! signing.rs      — Ed25519 signing over the payload
//! verification.rs — signature checks, VerifyError
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Create** with [`Transaction::new`] (random nonce).
//! 2. **Sign** with the sender's keypair.
//! 3. **Submit** via the HTTP façade or a peer `Tx` message.
//! 4. **Verify** on arrival, before it touches the pool.
//! 5. **Include** in a block by the producer, then executed by the VM.

pub mod signing;
pub mod types;
pub mod verification;

pub use types::Transaction;
pub use verification::VerifyError;
