//! # Contract VM
//!
//! Transaction payloads are byte code for a tiny stack machine. The chain
//! runs every transaction of a block, in order, through an [`Executor`]
//! against a staged copy of the contract state.
//!
//! ```text
//! instruction.rs — opcode table
//! machine.rs     — Vm interpreter, StackItem, VmError
//! ```
//!
//! ## Encoding
//!
//! Operands precede their opcode: `0x05 0x0a` pushes the integer 5. Bytes
//! that are not opcodes are skipped, so a payload of plain data is a valid
//! program that does nothing.

pub mod instruction;
pub mod machine;

pub use instruction::Instruction;
pub use machine::{StackItem, Vm, VmError, MAX_STACK_DEPTH};

use crate::storage::state::ContractState;

/// Executes a transaction payload against contract state.
pub trait Executor: Send + Sync {
    fn execute(&self, code: &[u8], state: &mut ContractState) -> Result<(), VmError>;
}
