//! Configuration management for voxlink
//!
//! Values resolve env > TOML file > default.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use self::file::ConfigFile;
use crate::api::ConversationClient;
use crate::realtime::{ConnectRequest, SessionConfig, SessionMode};
use crate::voice::CaptureConfig;
use crate::{Error, Result};

/// Default REST base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// REST base URL without trailing slash
    pub api_url: String,

    /// WebSocket base URL
    pub ws_url: Url,

    /// Bearer token for both REST and WebSocket endpoints
    pub token: Option<SecretString>,

    /// User whose conversations are listed
    pub user_id: Option<String>,

    /// Audio pipeline settings
    pub audio: AudioConfig,

    /// Session lifecycle settings
    pub session: SessionTiming,
}

/// Audio pipeline settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioConfig {
    /// Capture and playback rate in Hz
    pub sample_rate: u32,

    /// Samples per outbound frame
    pub frame_samples: usize,

    /// Linear gain applied to captured samples
    pub input_gain: f32,

    /// Lead window for scheduling playback
    pub lead_window_ms: u64,

    /// Capture backlog bound, in frames
    pub max_backlog_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::voice::SAMPLE_RATE,
            frame_samples: 480,
            input_gain: 1.0,
            lead_window_ms: 50,
            max_backlog_frames: 50,
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Grace window after a conversation
    pub grace: Duration,

    /// Grace window after an onboarding interview
    pub onboarding_grace: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(1500),
            onboarding_grace: Duration::from_millis(2000),
        }
    }
}

impl SessionTiming {
    /// Grace window for a session of `mode`
    #[must_use]
    pub const fn grace_for(&self, mode: SessionMode) -> Duration {
        if mode.is_onboarding() {
            self.onboarding_grace
        } else {
            self.grace
        }
    }
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value is invalid
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = env("VOXLINK_API_URL")
            .or(fc.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match env("VOXLINK_WS_URL").or(fc.ws_url) {
            Some(raw) => Url::parse(raw.trim_end_matches('/'))
                .map_err(|e| Error::Config(format!("invalid ws_url {raw}: {e}")))?,
            None => derive_ws_url(&api_url)?,
        };

        let token = env("VOXLINK_TOKEN")
            .or(fc.token)
            .filter(|t| !t.is_empty())
            .map(SecretString::from);

        let user_id = env("VOXLINK_USER_ID").or(fc.user_id).filter(|u| !u.is_empty());

        let defaults = AudioConfig::default();
        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(defaults.sample_rate),
            frame_samples: fc.audio.frame_samples.unwrap_or(defaults.frame_samples),
            input_gain: fc.audio.input_gain.unwrap_or(defaults.input_gain),
            lead_window_ms: fc.audio.lead_window_ms.unwrap_or(defaults.lead_window_ms),
            max_backlog_frames: fc
                .audio
                .max_backlog_frames
                .unwrap_or(defaults.max_backlog_frames),
        };

        // Devices are converted to the wire rate, which the protocol fixes
        if audio.sample_rate != crate::voice::SAMPLE_RATE {
            return Err(Error::Config(format!(
                "sample_rate must be {} (the wire rate), got {}",
                crate::voice::SAMPLE_RATE,
                audio.sample_rate
            )));
        }
        if audio.frame_samples == 0 {
            return Err(Error::Config("frame_samples must be positive".to_string()));
        }
        if !audio.input_gain.is_finite() || audio.input_gain < 0.0 {
            return Err(Error::Config(format!(
                "input_gain must be a non-negative number, got {}",
                audio.input_gain
            )));
        }

        let timing = SessionTiming::default();
        let session = SessionTiming {
            grace: fc
                .session
                .grace_ms
                .map_or(timing.grace, Duration::from_millis),
            onboarding_grace: fc
                .session
                .onboarding_grace_ms
                .map_or(timing.onboarding_grace, Duration::from_millis),
        };

        Ok(Self {
            api_url,
            ws_url,
            token,
            user_id,
            audio,
            session,
        })
    }

    /// Session tuning derived from the audio settings
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capture: CaptureConfig {
                sample_rate: self.audio.sample_rate,
                frame_samples: self.audio.frame_samples,
                gain: self.audio.input_gain,
                max_backlog_frames: self.audio.max_backlog_frames,
            },
            lead_window: Duration::from_millis(self.audio.lead_window_ms),
        }
    }

    /// Connect parameters for a session of `mode`
    ///
    /// # Errors
    ///
    /// Returns `Config` if no token is configured
    pub fn connect_request(&self, mode: SessionMode) -> Result<ConnectRequest> {
        Ok(ConnectRequest {
            ws_url: self.ws_url.clone(),
            token: self.require_token()?,
            mode,
        })
    }

    /// REST client for the configured user
    ///
    /// # Errors
    ///
    /// Returns `Config` if the token or user id is missing
    pub fn conversation_client(&self) -> Result<ConversationClient> {
        let user_id = self
            .user_id
            .clone()
            .ok_or_else(|| Error::Config("VOXLINK_USER_ID is not set".to_string()))?;
        Ok(ConversationClient::new(&self.api_url, user_id, self.require_token()?))
    }

    fn require_token(&self) -> Result<SecretString> {
        self.token
            .clone()
            .ok_or_else(|| Error::Config("VOXLINK_TOKEN is not set".to_string()))
    }
}

/// Derive the WebSocket base URL from the REST base URL
///
/// # Errors
///
/// Returns `Config` if `api_url` is not an http(s) URL
pub fn derive_ws_url(api_url: &str) -> Result<Url> {
    let ws = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(Error::Config(format!(
            "api_url must start with http:// or https://, got {api_url}"
        )));
    };
    Url::parse(&ws).map_err(|e| Error::Config(format!("invalid api_url {api_url}: {e}")))
}
