//! Validation and defaulting rules for the loaded configuration.
//!
//! Applied once after YAML decoding. Mutates the configuration in place to
//! fill defaults before range-checking, so validated configuration always
//! carries concrete values.

use super::{AsrExtra, Config, DialogSettings, LocationSettings};

type ValidationResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn validate(config: &mut Config) -> ValidationResult {
    if config.server.port == 0 {
        return Err("server.port is required".into());
    }
    if config.server.host.is_empty() {
        return Err("server.host is required".into());
    }
    validate_api(config)?;
    validate_session(config)
}

fn validate_api(config: &Config) -> ValidationResult {
    let api = &config.api;
    if api.url.is_empty() {
        return Err("api.url is required".into());
    }
    if api.app_id.is_empty() {
        return Err("api.app_id is required".into());
    }
    if api.app_key.is_empty() {
        return Err("api.app_key is required".into());
    }
    if api.resource_id.is_empty() {
        return Err("api.resource_id is required".into());
    }
    if api.access_key.is_empty() {
        return Err("api.access_key is required".into());
    }
    Ok(())
}

fn validate_session(config: &mut Config) -> ValidationResult {
    let session = &mut config.session;
    if session.tts.speaker.is_empty() {
        return Err("session.tts.speaker is required".into());
    }
    if session.tts.audio_config.sample_rate == 0 {
        return Err("session.tts.audio_config.sample_rate is required".into());
    }
    if session.tts.audio_config.channel == 0 {
        return Err("session.tts.audio_config.channel is required".into());
    }
    if session.tts.audio_config.format.is_empty() {
        session.tts.audio_config.format = "pcm".to_string();
    }
    if session.dialog.bot_name.is_empty() {
        return Err("session.dialog.bot_name is required".into());
    }
    if session.dialog.system_role.is_empty() {
        return Err("session.dialog.system_role is required".into());
    }
    if session.dialog.bot_name.chars().count() > 20 {
        return Err("session.dialog.bot_name cannot exceed 20 characters".into());
    }
    validate_asr_extra(&mut session.asr.extra)?;
    validate_dialog(&mut session.dialog)
}

fn validate_asr_extra(extra: &mut AsrExtra) -> ValidationResult {
    if extra.end_smooth_window_ms == 0 {
        extra.end_smooth_window_ms = 1500;
    }
    if !(500..=50_000).contains(&extra.end_smooth_window_ms) {
        return Err("session.asr.extra.end_smooth_window_ms must be between 500 and 50000".into());
    }
    Ok(())
}

fn validate_dialog(dialog: &mut DialogSettings) -> ValidationResult {
    if let Some(location) = &mut dialog.location {
        apply_location_defaults(location);
    }
    let extra = &mut dialog.extra;
    if extra.volc_websearch_type.is_empty() {
        extra.volc_websearch_type = "web_summary".to_string();
    }
    if extra.volc_websearch_result_count == 0 {
        extra.volc_websearch_result_count = 10;
    }
    if extra.volc_websearch_result_count > 10 {
        return Err("session.dialog.extra.volc_websearch_result_count cannot exceed 10".into());
    }
    if extra.model.is_empty() {
        extra.model = "O".to_string();
    }
    if extra.recv_timeout == 0 {
        extra.recv_timeout = 10;
    }
    if !(10..=120).contains(&extra.recv_timeout) {
        return Err("session.dialog.extra.recv_timeout must be between 10 and 120".into());
    }
    if extra.input_mod.is_empty() {
        extra.input_mod = "audio".to_string();
    }
    Ok(())
}

fn apply_location_defaults(location: &mut LocationSettings) {
    if location.country.is_empty() {
        location.country = "中国".to_string();
    }
    if location.country_iso.is_empty() {
        location.country_iso = "CN".to_string();
    }
}
