//! Opcode table.
//!
//! Any byte that is not listed here is an operand: the VM steps over it and
//! the next `PushInt`/`PushByte` picks it up.

/// A single VM opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    /// Push the preceding byte as an integer.
    PushInt = 0x0a,
    /// Push the preceding byte as a raw byte.
    PushByte = 0x0b,
    /// Pop a count `n`, then `n` bytes, and push them as one byte string.
    Pack = 0x10,
    /// Pop a key (byte string) and a value (integer) and store the value.
    Store = 0x20,
    /// Pop a key and push the integer stored under it.
    Get = 0x21,
    Add = 0x30,
    Sub = 0x32,
    Mul = 0x33,
    Div = 0x34,
}

impl Instruction {
    /// Decode an opcode. `None` means the byte is an operand.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x0a => Self::PushInt,
            0x0b => Self::PushByte,
            0x10 => Self::Pack,
            0x20 => Self::Store,
            0x21 => Self::Get,
            0x30 => Self::Add,
            0x32 => Self::Sub,
            0x33 => Self::Mul,
            0x34 => Self::Div,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
