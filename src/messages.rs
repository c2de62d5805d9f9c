use crate::NodeInfo;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// Size of a ring datagram on the wire.
///
/// Layout (big-endian):
/// `type:1 | hash_or_predecessor:2 | node_id:2 | node_ipv4:4 | node_port:2 | reserved:1`
pub const MESSAGE_SIZE: usize = 12;

const TYPE_LOOKUP: u8 = 0;
const TYPE_REPLY: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingMessage {
    // who owns `hash`? answer straight to `origin`
    Lookup { hash: u16, origin: NodeInfo },
    // `owner` owns the hash that was looked up, its predecessor is `predecessor_id`
    Reply { predecessor_id: u16, owner: NodeInfo },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than {MESSAGE_SIZE}")]
    TooShort(usize),
    #[error("unknown message type {0}")]
    UnknownType(u8),
}

impl RingMessage {
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let (kind, field, node) = match *self {
            RingMessage::Lookup { hash, origin } => (TYPE_LOOKUP, hash, origin),
            RingMessage::Reply {
                predecessor_id,
                owner,
            } => (TYPE_REPLY, predecessor_id, owner),
        };

        let mut buf = [0u8; MESSAGE_SIZE];
        buf[0] = kind;
        buf[1..3].copy_from_slice(&field.to_be_bytes());
        buf[3..5].copy_from_slice(&node.id.to_be_bytes());
        buf[5..9].copy_from_slice(&node.addr.ip().octets());
        buf[9..11].copy_from_slice(&node.addr.port().to_be_bytes());
        // buf[11] stays reserved
        buf
    }

    /// Decodes the first [`MESSAGE_SIZE`] bytes of a datagram. Trailing bytes
    /// are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < MESSAGE_SIZE {
            return Err(DecodeError::TooShort(buf.len()));
        }

        let field = u16::from_be_bytes([buf[1], buf[2]]);
        let node = NodeInfo {
            id: u16::from_be_bytes([buf[3], buf[4]]),
            addr: SocketAddrV4::new(
                Ipv4Addr::new(buf[5], buf[6], buf[7], buf[8]),
                u16::from_be_bytes([buf[9], buf[10]]),
            ),
        };

        match buf[0] {
            TYPE_LOOKUP => Ok(RingMessage::Lookup {
                hash: field,
                origin: node,
            }),
            TYPE_REPLY => Ok(RingMessage::Reply {
                predecessor_id: field,
                owner: node,
            }),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

impl fmt::Display for RingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingMessage::Lookup { hash, origin } => {
                write!(f, "lookup {:#06x} for {}", hash, origin)
            }
            RingMessage::Reply {
                predecessor_id,
                owner,
            } => write!(f, "reply owner {} (pred {:#06x})", owner, predecessor_id),
        }
    }
}

/// A ring message waiting to be sent, together with its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddrV4,
    pub message: RingMessage,
}
