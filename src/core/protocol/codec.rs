//! Frame encoder/decoder.
//!
//! The codec is stateless apart from its configured header fields; one
//! instance per serialization is typically prepared up front and reused for
//! every frame on a connection.

use super::{
    Compression, Message, MsgFlags, MsgType, PROTOCOL_VERSION, ProtocolError, SequencePredicate,
    Serialization, flags_contain_sequence,
};

/// Events scoped to the connection rather than a dialog session. Frames
/// carrying these never include a session id on the wire.
fn is_connection_event(event: i32) -> bool {
    matches!(event, 1 | 2 | 50 | 51 | 52)
}

/// Connection lifecycle responses echo the connect id after the event id.
fn has_connect_id(event: i32) -> bool {
    matches!(event, 50 | 51 | 52)
}

/// Encoder configuration: protocol version, header size in 32-bit words,
/// payload serialization/compression, and the sequence predicate shared
/// with the decoder.
#[derive(Debug, Clone)]
pub struct BinaryProtocol {
    header_words: u8,
    serialization: Serialization,
    compression: Compression,
    contains_sequence: SequencePredicate,
}

impl Default for BinaryProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryProtocol {
    pub fn new() -> Self {
        Self {
            header_words: 1,
            serialization: Serialization::Raw,
            compression: Compression::None,
            contains_sequence: flags_contain_sequence,
        }
    }

    pub fn set_serialization(&mut self, serialization: Serialization) {
        self.serialization = serialization;
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    /// Encode one frame. The payload is written as-is; compression other
    /// than `None` is rejected rather than silently ignored.
    pub fn marshal(&self, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        let serialization = match self.serialization {
            Serialization::Raw | Serialization::Json => self.serialization,
            Serialization::Thrift => {
                return Err(ProtocolError::UnsupportedSerialization(
                    Serialization::Thrift as u8,
                ));
            }
        };
        if self.compression != Compression::None {
            return Err(ProtocolError::UnsupportedCompression(self.compression as u8));
        }
        if msg.payload.len() > i32::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge(msg.payload.len()));
        }

        let header_len = usize::from(self.header_words) * 4;
        let mut buf = Vec::with_capacity(header_len + 20 + msg.payload.len());
        buf.resize(header_len, 0);
        buf[0] = (PROTOCOL_VERSION << 4) | self.header_words;
        buf[1] = (msg.msg_type.as_nibble() << 4) | msg.flags.0;
        buf[2] = ((serialization as u8) << 4) | self.compression as u8;

        if msg.flags.has_event() {
            buf.extend_from_slice(&msg.event.to_be_bytes());
            if !is_connection_event(msg.event) {
                write_string(&mut buf, &msg.session_id);
            }
            if has_connect_id(msg.event) {
                write_string(&mut buf, &msg.connect_id);
            }
        }
        if (self.contains_sequence)(msg.flags) {
            buf.extend_from_slice(&msg.sequence.to_be_bytes());
        }
        if msg.msg_type == MsgType::Error {
            buf.extend_from_slice(&msg.error_code.to_be_bytes());
        }
        buf.extend_from_slice(&(msg.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&msg.payload);
        Ok(buf)
    }
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Decode one frame from the front of `data`.
///
/// Returns the frame and the number of bytes consumed; trailing bytes are
/// left for the caller. `contains_sequence` must match the peer's encoder.
pub fn unmarshal(
    data: &[u8],
    contains_sequence: SequencePredicate,
) -> Result<(Message, usize), ProtocolError> {
    let mut reader = Reader { data, offset: 0 };

    let versioned = reader.take_u8()?;
    let version = versioned >> 4;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnknownVersion(version));
    }
    let header_words = versioned & 0x0F;
    if header_words == 0 {
        return Err(ProtocolError::UnknownHeaderSize(header_words));
    }

    let typed = reader.take_u8()?;
    let msg_type =
        MsgType::from_nibble(typed >> 4).ok_or(ProtocolError::MalformedKind(typed >> 4))?;
    let flags = MsgFlags(typed & 0x0F);

    let encoded = reader.take_u8()?;
    let serialization = Serialization::from_nibble(encoded >> 4)
        .ok_or(ProtocolError::UnsupportedSerialization(encoded >> 4))?;
    let compression = match encoded & 0x0F {
        0b0000 => Compression::None,
        nibble => return Err(ProtocolError::UnsupportedCompression(nibble)),
    };
    reader.skip(usize::from(header_words) * 4 - 3)?;

    let mut msg = Message::new(msg_type, flags);
    msg.serialization = serialization;
    msg.compression = compression;

    if flags.has_event() {
        msg.event = reader.take_i32()?;
        if !is_connection_event(msg.event) {
            msg.session_id = reader.take_string()?;
        }
        if has_connect_id(msg.event) {
            msg.connect_id = reader.take_string()?;
        }
    }
    if contains_sequence(flags) {
        msg.sequence = reader.take_i32()?;
    }
    if msg_type == MsgType::Error {
        msg.error_code = reader.take_u32()?;
    }
    let payload_len = reader.take_u32()? as usize;
    msg.payload = reader.take_bytes(payload_len)?.to_vec();

    Ok((msg, reader.offset))
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.data.len() - self.offset;
        if remaining < len {
            return Err(ProtocolError::Truncated {
                offset: self.offset,
                needed: len,
                available: remaining,
            });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.take_bytes(len).map(|_| ())
    }

    fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.take_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.take_u32()? as usize;
        let bytes = self.take_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_protocol() -> BinaryProtocol {
        let mut protocol = BinaryProtocol::new();
        protocol.set_serialization(Serialization::Json);
        protocol
    }

    fn round_trip(protocol: &BinaryProtocol, msg: &Message) -> Message {
        let frame = protocol.marshal(msg).unwrap();
        let (decoded, consumed) = unmarshal(&frame, flags_contain_sequence).unwrap();
        assert_eq!(consumed, frame.len());
        decoded
    }

    #[test]
    fn round_trips_session_event_frame() {
        let mut msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        msg.serialization = Serialization::Json;
        msg.event = 100;
        msg.session_id = "b2b6f2c4-77d9-4d77-8caf-2d59a2a0a71d".to_string();
        msg.payload = br#"{"asr":{}}"#.to_vec();

        assert_eq!(round_trip(&json_protocol(), &msg), msg);
    }

    #[test]
    fn round_trips_audio_frame() {
        let mut msg = Message::new(MsgType::AudioOnlyClient, MsgFlags::WITH_EVENT);
        msg.event = 200;
        msg.session_id = "s".repeat(36);
        msg.payload = vec![0x01, 0x02, 0x03, 0xFF];

        assert_eq!(round_trip(&BinaryProtocol::new(), &msg), msg);
    }

    #[test]
    fn round_trips_server_and_error_frames() {
        let mut audio = Message::new(MsgType::AudioOnlyServer, MsgFlags::WITH_EVENT);
        audio.event = 352;
        audio.session_id = "sess".to_string();
        audio.payload = vec![0u8; 320];
        assert_eq!(round_trip(&BinaryProtocol::new(), &audio), audio);

        let mut err = Message::new(MsgType::Error, MsgFlags::WITH_EVENT);
        err.serialization = Serialization::Json;
        err.event = 153;
        err.session_id = "sess".to_string();
        err.error_code = 55_000_001;
        err.payload = br#"{"error":"quota"}"#.to_vec();
        assert_eq!(round_trip(&json_protocol(), &err), err);
    }

    #[test]
    fn connection_events_skip_session_id_and_carry_connect_id() {
        let mut msg = Message::new(MsgType::FullServer, MsgFlags::WITH_EVENT);
        msg.serialization = Serialization::Json;
        msg.event = 50;
        msg.connect_id = "0f8b8e06-3b9c-4d1c-9f3e-6ed5bb3f72c5".to_string();
        msg.payload = br#"{"ok":true}"#.to_vec();

        let frame = json_protocol().marshal(&msg).unwrap();
        // Header word count 1, serialization JSON, compression None.
        assert_eq!(frame[0], 0b0001_0001);
        assert_eq!(frame[2], 0b0001_0000);

        let (decoded, _) = unmarshal(&frame, flags_contain_sequence).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.session_id.is_empty());
    }

    #[test]
    fn terminal_flag_sets_round_trip() {
        // Last packet without a sequence number.
        let mut last = Message::new(
            MsgType::AudioOnlyServer,
            MsgFlags::WITH_EVENT.union(MsgFlags::LAST_NO_SEQ),
        );
        last.event = 352;
        last.session_id = "sess".to_string();
        last.payload = vec![7u8; 16];
        assert!(!flags_contain_sequence(last.flags));
        assert_eq!(round_trip(&BinaryProtocol::new(), &last), last);

        // Last packet carrying its (negative) sequence number.
        let mut terminal = Message::new(
            MsgType::AudioOnlyServer,
            MsgFlags::WITH_EVENT.union(MsgFlags::NEGATIVE_SEQ),
        );
        terminal.event = 352;
        terminal.session_id = "sess".to_string();
        terminal.sequence = -42;
        terminal.payload = vec![8u8; 16];
        assert!(flags_contain_sequence(terminal.flags));
        assert_eq!(round_trip(&BinaryProtocol::new(), &terminal), terminal);
    }

    #[test]
    fn sequence_is_carried_when_flagged() {
        let mut msg = Message::new(
            MsgType::FullServer,
            MsgFlags::WITH_EVENT.union(MsgFlags::POSITIVE_SEQ),
        );
        msg.event = 350;
        msg.session_id = "sess".to_string();
        msg.sequence = -7;
        msg.payload = b"tick".to_vec();

        assert_eq!(round_trip(&BinaryProtocol::new(), &msg), msg);
    }

    #[test]
    fn every_strict_prefix_is_truncated() {
        let mut msg = Message::new(MsgType::FullServer, MsgFlags::WITH_EVENT);
        msg.event = 150;
        msg.session_id = "abc".to_string();
        msg.payload = br#"{"dialog_id":"d1"}"#.to_vec();
        let frame = BinaryProtocol::new().marshal(&msg).unwrap();

        for cut in 0..frame.len() {
            let err = unmarshal(&frame[..cut], flags_contain_sequence).unwrap_err();
            assert!(
                matches!(err, ProtocolError::Truncated { .. }),
                "prefix {cut}: {err:?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_left_unconsumed() {
        let mut msg = Message::new(MsgType::AudioOnlyServer, MsgFlags::WITH_EVENT);
        msg.event = 352;
        msg.session_id = "sess".to_string();
        msg.payload = vec![9u8; 8];
        let mut frame = BinaryProtocol::new().marshal(&msg).unwrap();
        let frame_len = frame.len();
        frame.extend_from_slice(&[1, 2, 3]);

        let (decoded, consumed) = unmarshal(&frame, flags_contain_sequence).unwrap();
        assert_eq!(consumed, frame_len);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn rejects_reserved_header_values() {
        let mut msg = Message::new(MsgType::FullServer, MsgFlags::WITH_EVENT);
        msg.event = 150;
        msg.session_id = "s".to_string();
        let frame = BinaryProtocol::new().marshal(&msg).unwrap();

        let mut bad_version = frame.clone();
        bad_version[0] = (0b0010 << 4) | 0b0001;
        assert_eq!(
            unmarshal(&bad_version, flags_contain_sequence).unwrap_err(),
            ProtocolError::UnknownVersion(0b0010)
        );

        let mut bad_header_size = frame.clone();
        bad_header_size[0] = 0b0001 << 4;
        assert_eq!(
            unmarshal(&bad_header_size, flags_contain_sequence).unwrap_err(),
            ProtocolError::UnknownHeaderSize(0)
        );

        let mut bad_kind = frame.clone();
        bad_kind[1] = (0b0101 << 4) | 0b100;
        assert_eq!(
            unmarshal(&bad_kind, flags_contain_sequence).unwrap_err(),
            ProtocolError::MalformedKind(0b0101)
        );

        let mut bad_compression = frame;
        bad_compression[2] |= 0b0001;
        assert_eq!(
            unmarshal(&bad_compression, flags_contain_sequence).unwrap_err(),
            ProtocolError::UnsupportedCompression(0b0001)
        );
    }

    #[test]
    fn marshal_rejects_unsupported_serialization() {
        let mut protocol = BinaryProtocol::new();
        protocol.set_serialization(Serialization::Thrift);
        let msg = Message::new(MsgType::FullClient, MsgFlags::WITH_EVENT);
        assert_eq!(
            protocol.marshal(&msg).unwrap_err(),
            ProtocolError::UnsupportedSerialization(Serialization::Thrift as u8)
        );
    }

    #[test]
    fn wider_headers_round_trip() {
        let frame = {
            let mut msg = Message::new(MsgType::FullServer, MsgFlags::WITH_EVENT);
            msg.event = 150;
            msg.session_id = "abc".to_string();
            msg.payload = b"{}".to_vec();
            let mut wide = BinaryProtocol::new();
            wide.header_words = 2;
            wide.marshal(&msg).unwrap()
        };
        assert_eq!(frame[0] & 0x0F, 2);

        let (decoded, consumed) = unmarshal(&frame, flags_contain_sequence).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded.event, 150);
        assert_eq!(decoded.session_id, "abc");
    }
}
