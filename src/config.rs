//! Runtime configuration.

use crate::audio::{CaptureSpec, FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::briefing::{DEFAULT_SUMMARY_MODEL, DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE};
use crate::gemini::live::LIVE_ENDPOINT;
use crate::gemini::rest::REST_ENDPOINT;
use crate::session::live::{DEFAULT_LIVE_MODEL, DEFAULT_LIVE_VOICE};
use crate::session::text::{DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_TEXT_MODEL};
use crate::session::LiveSessionConfig;
use crate::tools::executor::DEFAULT_NOTICE_TTL;

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CopilotConfig {
    pub api_key: Option<String>,
    pub live_endpoint: String,
    pub rest_endpoint: String,
    pub live_model: String,
    pub live_voice: String,
    pub text_model: String,
    pub summary_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub speaking_slack: Duration,
    pub max_tool_rounds: usize,
    pub notice_ttl: Duration,
    pub recording_dir: Option<PathBuf>,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            live_endpoint: LIVE_ENDPOINT.to_string(),
            rest_endpoint: REST_ENDPOINT.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            live_voice: DEFAULT_LIVE_VOICE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            speaking_slack: Duration::from_millis(100),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            notice_ttl: DEFAULT_NOTICE_TTL,
            recording_dir: None,
        }
    }
}

impl CopilotConfig {
    /// Defaults overridden by `GEMINI_API_KEY` and the `LEXIA_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    /// Blank values count as unset; unparsable numbers are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_u64 = |key: &str| {
            let raw = get(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {}={:?}: not a number", key, raw);
                    None
                }
            }
        };

        let mut cfg = Self::default();
        cfg.api_key = get("GEMINI_API_KEY");
        if let Some(v) = get("LEXIA_LIVE_ENDPOINT") {
            cfg.live_endpoint = v;
        }
        if let Some(v) = get("LEXIA_REST_ENDPOINT") {
            cfg.rest_endpoint = v;
        }
        if let Some(v) = get("LEXIA_LIVE_MODEL") {
            cfg.live_model = v;
        }
        if let Some(v) = get("LEXIA_LIVE_VOICE") {
            cfg.live_voice = v;
        }
        if let Some(v) = get("LEXIA_TEXT_MODEL") {
            cfg.text_model = v;
        }
        if let Some(v) = get("LEXIA_SUMMARY_MODEL") {
            cfg.summary_model = v;
        }
        if let Some(v) = get("LEXIA_TTS_MODEL") {
            cfg.tts_model = v;
        }
        if let Some(v) = get("LEXIA_TTS_VOICE") {
            cfg.tts_voice = v;
        }
        if let Some(v) = get_u64("LEXIA_SPEAKING_SLACK_MS") {
            cfg.speaking_slack = Duration::from_millis(v);
        }
        match get_u64("LEXIA_MAX_TOOL_ROUNDS") {
            Some(0) => warn!("Ignoring LEXIA_MAX_TOOL_ROUNDS=0: at least one round is needed"),
            Some(v) => cfg.max_tool_rounds = v as usize,
            None => {}
        }
        if let Some(v) = get_u64("LEXIA_NOTICE_TTL_MS") {
            cfg.notice_ttl = Duration::from_millis(v);
        }
        cfg.recording_dir = get("LEXIA_RECORDING_DIR").map(PathBuf::from);
        cfg
    }

    pub fn capture_spec(&self) -> CaptureSpec {
        CaptureSpec {
            sample_rate: self.input_sample_rate,
            frame_size: self.frame_size,
            channels: 1,
        }
    }

    pub fn live_session(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            model: self.live_model.clone(),
            voice: self.live_voice.clone(),
            output_sample_rate: self.output_sample_rate,
            capture: self.capture_spec(),
            speaking_slack: self.speaking_slack,
            recording_dir: self.recording_dir.clone(),
        }
    }
}
