//! JSON message types exchanged with the browser.
//!
//! The browser speaks text frames for control (`start`, `stop`) and binary
//! frames for raw PCM; the bridge answers with `ready`, `event`, `error`
//! text frames and binary TTS audio.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::core::audio::Encoding;

pub(crate) fn default_sample_rate() -> u32 {
    48_000
}

/// Text frames accepted from the browser.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// Declares the stream format. Must be the first frame.
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "sampleRate", default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default)]
        encoding: Encoding,
    },
    /// Ends the session cleanly.
    #[serde(rename = "stop")]
    Stop,
}

/// Text frames sent to the browser.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "ready")]
    Ready,
    /// An upstream dialog event; the payload is embedded verbatim as a
    /// JSON subdocument, never re-encoded.
    #[serde(rename = "event")]
    Event {
        event_id: i32,
        payload: Box<RawValue>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn start_message_applies_defaults() {
        let msg: IncomingMessage = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        let IncomingMessage::Start {
            sample_rate,
            encoding,
        } = msg
        else {
            panic!("expected start");
        };
        assert_eq!(sample_rate, 48_000);
        assert_eq!(encoding, Encoding::F32le);
    }

    #[test]
    fn start_message_accepts_declared_format() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"start","sampleRate":44100,"encoding":"s16le"}"#)
                .unwrap();
        let IncomingMessage::Start {
            sample_rate,
            encoding,
        } = msg
        else {
            panic!("expected start");
        };
        assert_eq!(sample_rate, 44_100);
        assert_eq!(encoding, Encoding::S16le);
    }

    #[test]
    fn unsupported_encodings_fail_to_parse() {
        let result = serde_json::from_str::<IncomingMessage>(
            r#"{"type":"start","sampleRate":48000,"encoding":"opus"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_message_types_fail_to_parse() {
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"mute"}"#).is_err());
    }

    #[test]
    fn event_payload_is_embedded_as_json() {
        let payload = serde_json::from_str::<Box<RawValue>>(r#"{"content":"你好"}"#).unwrap();
        let msg = OutgoingMessage::Event {
            event_id: 550,
            payload,
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"event","event_id":550,"payload":{"content":"你好"}})
        );
    }

    #[test]
    fn ready_and_error_serialize_with_type_tags() {
        assert_eq!(
            serde_json::to_string(&OutgoingMessage::Ready).unwrap(),
            r#"{"type":"ready"}"#
        );
        let error = OutgoingMessage::Error {
            message: "boom".to_string(),
        };
        let value: Value = serde_json::from_str(&serde_json::to_string(&error).unwrap()).unwrap();
        assert_eq!(value, json!({"type":"error","message":"boom"}));
    }
}
