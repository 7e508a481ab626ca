//! Configuration module for the voxbridge server.
//!
//! Configuration is a single YAML document with three sections: `server`
//! (listen address), `api` (upstream URL and credentials), and `session`
//! (the ASR/TTS/dialog record sent upstream in StartSession). Unknown keys
//! are rejected. Defaults and range checks are applied by the validation
//! submodule after decoding.
//!
//! # Example
//! ```rust,no_run
//! use voxbridge::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

mod validation;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerSettings,
    pub api: ApiSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Upstream endpoint and the credentials attached to every dial.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ApiSettings {
    pub url: String,
    pub app_id: String,
    pub app_key: String,
    pub resource_id: String,
    pub access_key: String,
}

/// Parameters for the upstream StartSession record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionSettings {
    pub asr: AsrSettings,
    pub tts: TtsSettings,
    pub dialog: DialogSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AsrSettings {
    pub extra: AsrExtra,
}

/// Passed through to the upstream service verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AsrExtra {
    pub end_smooth_window_ms: u32,
    pub enable_custom_vad: bool,
    pub enable_asr_twopass: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TtsSettings {
    pub speaker: String,
    pub audio_config: AudioSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AudioSettings {
    pub channel: u32,
    pub format: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DialogSettings {
    pub dialog_id: String,
    pub bot_name: String,
    pub system_role: String,
    pub speaking_style: String,
    pub character_manifest: String,
    pub location: Option<LocationSettings>,
    pub extra: DialogExtra,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LocationSettings {
    pub longitude: f64,
    pub latitude: f64,
    pub city: String,
    pub country: String,
    pub province: String,
    pub district: String,
    pub town: String,
    #[serde(rename = "country_code")]
    pub country_iso: String,
    pub address: String,
}

/// Passed through to the upstream service verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DialogExtra {
    pub strict_audit: bool,
    pub audit_response: String,
    pub enable_volc_websearch: bool,
    pub volc_websearch_type: String,
    pub volc_websearch_api_key: String,
    pub volc_websearch_result_count: u32,
    #[serde(rename = "volc_websearch_no_result_message")]
    pub volc_websearch_no_result_msg: String,
    pub input_mod: String,
    pub model: String,
    pub recv_timeout: u32,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    ///
    /// Missing optional values receive their defaults; missing required
    /// values and out-of-range settings are reported as errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| format!("open config {}: {e}", path.display()))?;
        Self::parse(&contents)
    }

    pub(crate) fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: Config =
            serde_yaml::from_str(contents).map_err(|e| format!("decode config: {e}"))?;
        validation::validate(&mut config)?;
        Ok(config)
    }

    /// The `host:port` listen address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
