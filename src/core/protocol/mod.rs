//! Binary frame model for the upstream speech-dialog protocol.
//!
//! Every frame starts with a fixed header (version, header size, message
//! kind, flag nibble, serialization, compression) followed by optional
//! body sections whose presence is derivable from the header alone:
//! event id, session id, connect id, sequence number, error code, payload.
//!
//! All multi-byte integers on the wire are big-endian. Event ids and
//! sequence numbers are signed 32-bit; string and payload lengths are
//! unsigned 32-bit.

use std::fmt;

use thiserror::Error;

mod codec;

pub use codec::{BinaryProtocol, unmarshal};

/// Protocol version nibble. Only version 1 is defined.
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Message kind nibble (high half of the second header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    FullClient = 0b0001,
    AudioOnlyClient = 0b0010,
    FullServer = 0b1001,
    AudioOnlyServer = 0b1011,
    Error = 0b1111,
}

impl MsgType {
    /// Parse a kind nibble, or `None` for reserved values.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0b0001 => Some(Self::FullClient),
            0b0010 => Some(Self::AudioOnlyClient),
            0b1001 => Some(Self::FullServer),
            0b1011 => Some(Self::AudioOnlyServer),
            0b1111 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_nibble(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FullClient => "FullClient",
            Self::AudioOnlyClient => "AudioOnlyClient",
            Self::FullServer => "FullServer",
            Self::AudioOnlyServer => "AudioOnlyServer",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Flag nibble (low half of the second header byte).
///
/// Bit 0b100 marks an event-carrying frame. Bit 0b001 marks a frame with a
/// sequence number; 0b011 is the terminal (negative-sequence) variant and
/// 0b010 a terminal frame without a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgFlags(pub u8);

impl MsgFlags {
    pub const NONE: MsgFlags = MsgFlags(0b000);
    pub const POSITIVE_SEQ: MsgFlags = MsgFlags(0b001);
    pub const LAST_NO_SEQ: MsgFlags = MsgFlags(0b010);
    pub const NEGATIVE_SEQ: MsgFlags = MsgFlags(0b011);
    pub const WITH_EVENT: MsgFlags = MsgFlags(0b100);

    pub fn has_event(self) -> bool {
        self.0 & Self::WITH_EVENT.0 != 0
    }

    pub fn union(self, other: MsgFlags) -> MsgFlags {
        MsgFlags(self.0 | other.0)
    }
}

/// Standard sequence predicate: a frame carries a sequence number when its
/// sequence bit is set, whether or not it is the terminal frame.
pub fn flags_contain_sequence(flags: MsgFlags) -> bool {
    flags.0 & 0b001 != 0
}

/// Decides from the flag nibble whether a frame carries a sequence number.
pub type SequencePredicate = fn(MsgFlags) -> bool;

/// Payload serialization nibble (high half of the third header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Serialization {
    #[default]
    Raw = 0b0000,
    Json = 0b0001,
    /// Recognized on the wire but not supported for encoding.
    Thrift = 0b0011,
}

impl Serialization {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0b0000 => Some(Self::Raw),
            0b0001 => Some(Self::Json),
            0b0011 => Some(Self::Thrift),
            _ => None,
        }
    }
}

/// Payload compression nibble (low half of the third header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0b0000,
    /// Recognized on the wire but not supported.
    Gzip = 0b0001,
}

/// One decoded (or to-be-encoded) upstream frame.
///
/// Optional sections default to their zero values; whether a section is
/// written on the wire depends on the flags, the event id, and the message
/// kind, never on the field values themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub msg_type: MsgType,
    pub flags: MsgFlags,
    pub serialization: Serialization,
    pub compression: Compression,
    pub event: i32,
    pub session_id: String,
    pub connect_id: String,
    pub sequence: i32,
    pub error_code: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: MsgType, flags: MsgFlags) -> Self {
        Self {
            msg_type,
            flags,
            serialization: Serialization::default(),
            compression: Compression::default(),
            event: 0,
            session_id: String::new(),
            connect_id: String::new(),
            sequence: 0,
            error_code: 0,
            payload: Vec::new(),
        }
    }
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message kind {0:#06b}")]
    MalformedKind(u8),

    #[error("unsupported serialization {0:#06b}")]
    UnsupportedSerialization(u8),

    #[error("unsupported compression {0:#06b}")]
    UnsupportedCompression(u8),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("truncated frame: need {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unknown protocol version {0:#06b}")]
    UnknownVersion(u8),

    #[error("unknown header size {0:#06b}")]
    UnknownHeaderSize(u8),
}
