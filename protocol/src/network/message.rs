//! # Wire Messages
//!
//! Everything peers say to each other is one of the six [`Message`] kinds.
//! A frame (after length-prefix framing by the transport) is:
//!
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ tag: u8  │ payload: bincode(...)        │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! | Tag  | Kind      | Payload              |
//! |------|-----------|----------------------|
//! | 0x01 | Tx        | `Transaction`        |
//! | 0x02 | Block     | `Block`              |
//! | 0x03 | GetBlocks | `GetBlocksMessage`   |
//! | 0x04 | Status    | `StatusMessage`      |
//! | 0x05 | GetStatus | (empty)              |
//! | 0x06 | Blocks    | `BlocksMessage`      |
//!
//! Decoding never panics. An unknown tag or a malformed payload yields a
//! [`CodecError`] that the node logs and drops.

use std::fmt;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Block;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Tx = 0x01,
    Block = 0x02,
    GetBlocks = 0x03,
    Status = 0x04,
    GetStatus = 0x05,
    Blocks = 0x06,
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0x01 => Self::Tx,
            0x02 => Self::Block,
            0x03 => Self::GetBlocks,
            0x04 => Self::Status,
            0x05 => Self::GetStatus,
            0x06 => Self::Blocks,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A peer's self-description, sent in reply to `GetStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub id: String,
    pub current_height: u32,
    pub version: u32,
}

/// Request for blocks with height in `[from, to)`. `to == 0` asks for
/// everything from `from` through the responder's tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksMessage {
    pub blocks: Vec<Block>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Tx(Transaction),
    Block(Block),
    GetBlocks(GetBlocksMessage),
    Status(StatusMessage),
    GetStatus,
    Blocks(BlocksMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Tx(_) => MessageKind::Tx,
            Self::Block(_) => MessageKind::Block,
            Self::GetBlocks(_) => MessageKind::GetBlocks,
            Self::Status(_) => MessageKind::Status,
            Self::GetStatus => MessageKind::GetStatus,
            Self::Blocks(_) => MessageKind::Blocks,
        }
    }

    /// Tag byte followed by the bincode payload.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let payload = match self {
            Self::Tx(tx) => bincode::serialize(tx),
            Self::Block(block) => bincode::serialize(block),
            Self::GetBlocks(msg) => bincode::serialize(msg),
            Self::Status(msg) => bincode::serialize(msg),
            Self::GetStatus => Ok(Vec::new()),
            Self::Blocks(msg) => bincode::serialize(msg),
        }
        .map_err(|e| CodecError::Encode(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(self.kind() as u8);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (&tag, payload) = frame.split_first().ok_or(CodecError::Empty)?;
        let kind = MessageKind::try_from(tag)?;
        let err = |e: bincode::Error| CodecError::Decode {
            kind,
            reason: e.to_string(),
        };
        Ok(match kind {
            MessageKind::Tx => Self::Tx(bincode::deserialize(payload).map_err(err)?),
            MessageKind::Block => Self::Block(bincode::deserialize(payload).map_err(err)?),
            MessageKind::GetBlocks => {
                Self::GetBlocks(bincode::deserialize(payload).map_err(err)?)
            }
            MessageKind::Status => Self::Status(bincode::deserialize(payload).map_err(err)?),
            MessageKind::GetStatus => Self::GetStatus,
            MessageKind::Blocks => Self::Blocks(bincode::deserialize(payload).map_err(err)?),
        })
    }
}

// ---------------------------------------------------------------------------
// Rpc
// ---------------------------------------------------------------------------

/// A raw frame as it came off a peer connection.
#[derive(Debug, Clone)]
pub struct Rpc {
    pub from: SocketAddr,
    pub payload: Bytes,
}

/// A decoded frame, still tagged with the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub from: SocketAddr,
    pub message: Message,
}

pub fn decode_rpc(rpc: &Rpc) -> Result<DecodedMessage, CodecError> {
    Ok(DecodedMessage {
        from: rpc.from,
        message: Message::decode(&rpc.payload)?,
    })
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("failed to decode {kind} payload: {reason}")]
    Decode { kind: MessageKind, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn signed_block() -> Block {
        let mut tx = Transaction::new(b"data".to_vec());
        tx.sign(&Keypair::generate());
        let mut block = Block::from_prev_header(&Block::genesis().header, vec![tx]);
        block.sign(&Keypair::generate());
        block
    }

    #[test]
    fn tag_bytes_are_stable() {
        assert_eq!(Message::GetStatus.encode().unwrap().as_ref(), &[0x05]);
        let get_blocks = Message::GetBlocks(GetBlocksMessage { from: 1, to: 0 })
            .encode()
            .unwrap();
        assert_eq!(get_blocks[0], 0x03);
    }

    #[test]
    fn block_survives_the_wire_and_still_verifies() {
        let block = signed_block();
        let bytes = Message::Block(block.clone()).encode().unwrap();
        match Message::decode(&bytes).unwrap() {
            Message::Block(decoded) => {
                assert_eq!(decoded.hash(), block.hash());
                assert!(decoded.verify().is_ok());
            }
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn status_and_blocks_decode() {
        let status = Message::Status(StatusMessage {
            id: "node-a".into(),
            current_height: 12,
            version: 1,
        });
        assert_eq!(Message::decode(&status.encode().unwrap()).unwrap(), status);

        let blocks = Message::Blocks(BlocksMessage {
            blocks: vec![signed_block()],
        });
        assert_eq!(Message::decode(&blocks.encode().unwrap()).unwrap(), blocks);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            Message::decode(&[0x07, 1, 2, 3]),
            Err(CodecError::UnknownMessageType(0x07))
        );
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert_eq!(Message::decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let bytes = Message::Block(signed_block()).encode().unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            Message::decode(truncated),
            Err(CodecError::Decode {
                kind: MessageKind::Block,
                ..
            })
        ));
    }

    #[test]
    fn decode_rpc_keeps_sender() {
        let rpc = Rpc {
            from: addr(),
            payload: Message::GetStatus.encode().unwrap(),
        };
        let decoded = decode_rpc(&rpc).unwrap();
        assert_eq!(decoded.from, addr());
        assert_eq!(decoded.message, Message::GetStatus);
    }
}
