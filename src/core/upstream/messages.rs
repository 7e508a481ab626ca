//! Event ids and JSON payload records for the upstream dialog protocol.

use serde::Serialize;

use crate::config::{AsrExtra, AudioSettings, DialogExtra, LocationSettings, SessionSettings};

// Client-originated events.
pub const EVENT_START_CONNECTION: i32 = 1;
pub const EVENT_FINISH_CONNECTION: i32 = 2;
pub const EVENT_START_SESSION: i32 = 100;
pub const EVENT_FINISH_SESSION: i32 = 102;
pub const EVENT_USER_QUERY: i32 = 200;
pub const EVENT_SAY_HELLO: i32 = 300;

// Server-originated lifecycle events. Informational events outside this
// set are forwarded to the browser without interpretation.
pub const EVENT_CONNECTION_STARTED: i32 = 50;
pub const EVENT_CONNECTION_FINISHED: i32 = 52;
pub const EVENT_SESSION_STARTED: i32 = 150;
pub const EVENT_SESSION_FINISHED: i32 = 152;
pub const EVENT_SESSION_FAILED: i32 = 153;

/// JSON body of the StartSession event, borrowed from configuration.
#[derive(Debug, Serialize)]
pub struct StartSessionPayload<'a> {
    pub asr: AsrPayload<'a>,
    pub tts: TtsPayload<'a>,
    pub dialog: DialogPayload<'a>,
}

#[derive(Debug, Serialize)]
pub struct AsrPayload<'a> {
    pub extra: &'a AsrExtra,
}

#[derive(Debug, Serialize)]
pub struct TtsPayload<'a> {
    pub speaker: &'a str,
    pub audio_config: &'a AudioSettings,
}

#[derive(Debug, Serialize)]
pub struct DialogPayload<'a> {
    #[serde(skip_serializing_if = "ref_str_is_empty")]
    pub dialog_id: &'a str,
    pub bot_name: &'a str,
    pub system_role: &'a str,
    pub speaking_style: &'a str,
    #[serde(skip_serializing_if = "ref_str_is_empty")]
    pub character_manifest: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<&'a LocationSettings>,
    pub extra: &'a DialogExtra,
}

#[derive(Debug, Serialize)]
pub struct SayHelloPayload<'a> {
    pub content: &'a str,
}

impl<'a> StartSessionPayload<'a> {
    pub fn from_settings(session: &'a SessionSettings) -> Self {
        Self {
            asr: AsrPayload {
                extra: &session.asr.extra,
            },
            tts: TtsPayload {
                speaker: &session.tts.speaker,
                audio_config: &session.tts.audio_config,
            },
            dialog: DialogPayload {
                dialog_id: &session.dialog.dialog_id,
                bot_name: &session.dialog.bot_name,
                system_role: &session.dialog.system_role,
                speaking_style: &session.dialog.speaking_style,
                character_manifest: &session.dialog.character_manifest,
                location: session.dialog.location.as_ref(),
                extra: &session.dialog.extra,
            },
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn ref_str_is_empty(value: &&str) -> bool {
    value.is_empty()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::config::{DialogSettings, TtsSettings};

    fn settings() -> SessionSettings {
        SessionSettings {
            asr: Default::default(),
            tts: TtsSettings {
                speaker: "zh_female_tianmei".to_string(),
                audio_config: AudioSettings {
                    channel: 1,
                    format: "pcm".to_string(),
                    sample_rate: 24_000,
                },
            },
            dialog: DialogSettings {
                bot_name: "小助手".to_string(),
                system_role: "助理".to_string(),
                speaking_style: "亲切".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn empty_optional_dialog_fields_are_omitted() {
        let settings = settings();
        let payload = StartSessionPayload::from_settings(&settings);
        let value: Value = serde_json::to_value(&payload).unwrap();

        let dialog = value.get("dialog").unwrap();
        assert!(dialog.get("dialog_id").is_none());
        assert!(dialog.get("character_manifest").is_none());
        assert!(dialog.get("location").is_none());
        assert_eq!(dialog["bot_name"], json!("小助手"));
        assert_eq!(
            value["tts"]["audio_config"],
            json!({"channel": 1, "format": "pcm", "sample_rate": 24000})
        );
    }

    #[test]
    fn dialog_extra_uses_wire_key_names() {
        let mut settings = settings();
        settings.dialog.extra.volc_websearch_no_result_msg = "未找到结果".to_string();
        settings.dialog.dialog_id = "d-1".to_string();
        let payload = StartSessionPayload::from_settings(&settings);
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["dialog"]["dialog_id"], json!("d-1"));
        assert_eq!(
            value["dialog"]["extra"]["volc_websearch_no_result_message"],
            json!("未找到结果")
        );
        assert_eq!(
            value["asr"]["extra"],
            json!({
                "end_smooth_window_ms": 0,
                "enable_custom_vad": false,
                "enable_asr_twopass": false
            })
        );
    }
}
