//! The stack machine.

use thiserror::Error;

use super::instruction::Instruction;
use super::Executor;
use crate::storage::state::ContractState;

/// Maximum number of items on the operand stack.
pub const MAX_STACK_DEPTH: usize = 128;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Why a program aborted. Any error leaves the caller's state untouched only
/// if the caller ran against a copy; the chain always does.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("stack underflow at offset {ip}")]
    StackUnderflow { ip: usize },

    #[error("stack overflow at offset {ip}")]
    StackOverflow { ip: usize },

    #[error("{op:?} at offset {ip}: expected {expected}")]
    TypeMismatch {
        op: Instruction,
        ip: usize,
        expected: &'static str,
    },

    #[error("{op:?} at offset {ip} has no operand byte")]
    MissingOperand { op: Instruction, ip: usize },

    #[error("invalid pack length {len} at offset {ip}")]
    InvalidPackLength { len: i64, ip: usize },

    #[error("key {key} not found at offset {ip}")]
    KeyNotFound { key: String, ip: usize },

    #[error("arithmetic overflow at offset {ip}")]
    Overflow { ip: usize },

    #[error("division by zero at offset {ip}")]
    DivisionByZero { ip: usize },
}

// ---------------------------------------------------------------------------
// StackItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackItem {
    Int(i64),
    Byte(u8),
    Bytes(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Vm
// ---------------------------------------------------------------------------

/// Byte-code interpreter. Stateless between runs; every call to
/// [`Executor::execute`] gets a fresh stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct Vm;

impl Vm {
    pub fn new() -> Self {
        Self
    }

    /// Run `code` and return the final stack, bottom first.
    pub fn run(&self, code: &[u8], state: &mut ContractState) -> Result<Vec<StackItem>, VmError> {
        let mut machine = Machine {
            code,
            ip: 0,
            stack: Vec::new(),
            state,
        };
        while machine.ip < code.len() {
            if let Some(instr) = Instruction::from_byte(code[machine.ip]) {
                machine.exec(instr)?;
            }
            machine.ip += 1;
        }
        Ok(machine.stack)
    }
}

impl Executor for Vm {
    fn execute(&self, code: &[u8], state: &mut ContractState) -> Result<(), VmError> {
        self.run(code, state).map(|_| ())
    }
}

struct Machine<'a> {
    code: &'a [u8],
    ip: usize,
    stack: Vec<StackItem>,
    state: &'a mut ContractState,
}

impl Machine<'_> {
    fn exec(&mut self, op: Instruction) -> Result<(), VmError> {
        match op {
            Instruction::PushInt => {
                let operand = self.operand(op)?;
                self.push(StackItem::Int(i64::from(operand)))
            }
            Instruction::PushByte => {
                let operand = self.operand(op)?;
                self.push(StackItem::Byte(operand))
            }
            Instruction::Pack => {
                let n = self.pop_int(op)?;
                let len = usize::try_from(n)
                    .ok()
                    .filter(|len| *len <= self.stack.len())
                    .ok_or(VmError::InvalidPackLength { len: n, ip: self.ip })?;
                let mut packed = Vec::with_capacity(len);
                for _ in 0..len {
                    match self.pop()? {
                        StackItem::Byte(b) => packed.push(b),
                        _ => return Err(self.mismatch(op, "byte")),
                    }
                }
                packed.reverse();
                self.push(StackItem::Bytes(packed))
            }
            Instruction::Store => {
                let key = self.pop_bytes(op)?;
                let value = self.pop_int(op)?;
                self.state.put_int(key, value);
                Ok(())
            }
            Instruction::Get => {
                let key = self.pop_bytes(op)?;
                let value = self.state.get_int(&key).ok_or_else(|| VmError::KeyNotFound {
                    key: hex::encode(&key),
                    ip: self.ip,
                })?;
                self.push(StackItem::Int(value))
            }
            Instruction::Add => self.binary(op, i64::checked_add),
            Instruction::Sub => self.binary(op, i64::checked_sub),
            Instruction::Mul => self.binary(op, i64::checked_mul),
            Instruction::Div => {
                if matches!(self.stack.last(), Some(StackItem::Int(0))) {
                    return Err(VmError::DivisionByZero { ip: self.ip });
                }
                self.binary(op, i64::checked_div)
            }
        }
    }

    /// `lhs op rhs` where `rhs` is on top of the stack.
    fn binary(&mut self, op: Instruction, f: fn(i64, i64) -> Option<i64>) -> Result<(), VmError> {
        let rhs = self.pop_int(op)?;
        let lhs = self.pop_int(op)?;
        let result = f(lhs, rhs).ok_or(VmError::Overflow { ip: self.ip })?;
        self.push(StackItem::Int(result))
    }

    fn operand(&self, op: Instruction) -> Result<u8, VmError> {
        self.ip
            .checked_sub(1)
            .map(|i| self.code[i])
            .ok_or(VmError::MissingOperand { op, ip: self.ip })
    }

    fn push(&mut self, item: StackItem) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(VmError::StackOverflow { ip: self.ip });
        }
        self.stack.push(item);
        Ok(())
    }

    fn pop(&mut self) -> Result<StackItem, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { ip: self.ip })
    }

    fn pop_int(&mut self, op: Instruction) -> Result<i64, VmError> {
        match self.pop()? {
            StackItem::Int(v) => Ok(v),
            _ => Err(self.mismatch(op, "integer")),
        }
    }

    fn pop_bytes(&mut self, op: Instruction) -> Result<Vec<u8>, VmError> {
        match self.pop()? {
            StackItem::Bytes(b) => Ok(b),
            _ => Err(self.mismatch(op, "byte string")),
        }
    }

    fn mismatch(&self, op: Instruction, expected: &'static str) -> VmError {
        VmError::TypeMismatch {
            op,
            ip: self.ip,
            expected,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
