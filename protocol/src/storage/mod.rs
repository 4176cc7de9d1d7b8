//! # Storage Module
//!
//! The chain and everything it is built from.
//!
//! ## Architecture
//!
//! ```text
//! block.rs     — Header, Block, genesis, data-hash commitment
//! validator.rs — BlockValidator: acceptance rules against the tip
//! chain.rs     — Chain: ordered headers/blocks, indexes, add_block
//! state.rs     — ContractState written by the VM
//! store.rs     — BlockStore sink (MemStore is a no-op)
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Block → BlockValidator → Vm (staged ContractState) → BlockStore → Chain
//! ```

pub mod block;
pub mod chain;
pub mod state;
pub mod store;
pub mod validator;

pub use block::{compute_data_hash, Block, Header};
pub use chain::{Chain, ChainError};
pub use state::ContractState;
pub use store::{BlockStore, MemStore, StoreError};
pub use validator::BlockValidator;
