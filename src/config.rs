//! Configuration management for Colloquy
//!
//! Settings are stored as pretty JSON in `~/.colloquy/config.json` with a
//! schema version so older files can be migrated forward. Every section uses
//! `#[serde(default)]`, so a partial file only overrides what it names.

use crate::audio::decode::AudioFormat;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current config schema version
pub const CURRENT_VERSION: u32 = 2;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Remote backend settings
    pub backend: BackendConfig,
    /// Microphone capture and endpointing settings
    pub listening: ListeningConfig,
    /// Response polling settings
    pub polling: PollingConfig,
    /// Decode and playback settings
    pub playback: PlaybackConfig,
    /// Conversation flow settings
    pub conversation: ConversationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            backend: BackendConfig::default(),
            listening: ListeningConfig::default(),
            polling: PollingConfig::default(),
            playback: PlaybackConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

/// Remote backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the speech/language backend
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Capture and voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListeningConfig {
    /// Selected input device ID (None for system default)
    pub device_id: Option<String>,
    /// Sample rate the detector works at, in Hz
    pub sample_rate: u32,
    /// Samples per analysis chunk
    pub chunk_size: usize,
    /// Mean absolute amplitude above which a chunk counts as speech
    pub silence_threshold: f32,
    /// Seconds of accumulated silence after onset that end a recording
    pub silence_time_to_stop_secs: f32,
    /// Hard cap on a single recording, in seconds
    pub max_recording_secs: f32,
    /// How long to wait for speech onset in automatic mode, in seconds
    pub max_wait_secs: f32,
    /// Audio kept from before onset, in seconds
    pub pre_buffer_secs: f32,
    /// Silence-based endpointing (true) or fixed-length capture (false)
    pub use_dynamic_listening: bool,
    /// Length of a fixed capture, in seconds
    pub fixed_recording_secs: f32,
    /// Hands-free loop (true) or wait for a manual trigger each turn (false)
    pub use_automatic_listening: bool,
    /// Log every chunk's energy at debug level
    pub debug_audio_levels: bool,
}

impl Default for ListeningConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: 16000,
            chunk_size: 1024,
            silence_threshold: 0.005,
            silence_time_to_stop_secs: 5.0,
            max_recording_secs: 30.0,
            max_wait_secs: 10.0,
            pre_buffer_secs: 0.5,
            use_dynamic_listening: true,
            fixed_recording_secs: 5.0,
            use_automatic_listening: true,
            debug_audio_levels: false,
        }
    }
}

/// Response polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between poll attempts in seconds
    pub interval_secs: f32,
    /// Maximum number of poll attempts per request
    pub max_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0.5,
            max_retries: 30,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f32(self.interval_secs.max(0.0))
    }
}

/// Decode and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Decode attempts, in order
    pub format_priority: Vec<AudioFormat>,
    /// Delay after playback before the microphone is re-armed, in seconds
    pub post_speech_wait_secs: f32,
    /// Try fixed-offset WAV header parsing when every structured decode fails
    pub manual_wav_fallback: bool,
    /// Where staged audio files are written (None for the system temp dir)
    pub staging_dir: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            format_priority: vec![AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Ogg],
            post_speech_wait_secs: 0.5,
            manual_wav_fallback: true,
            staging_dir: None,
        }
    }
}

impl PlaybackConfig {
    pub fn post_speech_wait(&self) -> Duration {
        Duration::from_secs_f32(self.post_speech_wait_secs.max(0.0))
    }
}

/// How a response is obtained once the transcript is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Submit, then poll until the backend reports completion
    #[default]
    Polling,
    /// One synchronous request that returns the full response
    Blocking,
}

/// Conversation flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Response protocol
    pub response_mode: ResponseMode,
    /// Phrases that end the conversation when heard in a transcript
    pub exit_phrases: Vec<String>,
    /// Fetch and play a filler utterance while the response is generated
    pub play_filler: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            response_mode: ResponseMode::default(),
            exit_phrases: ["goodbye", "bye", "exit", "quit", "end conversation"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            play_filler: true,
        }
    }
}

impl Config {
    /// Check values that would make the conversation loop misbehave
    pub fn validate(&self) -> Result<()> {
        let l = &self.listening;
        if l.sample_rate == 0 {
            bail!("listening.sample_rate must be greater than 0");
        }
        if l.chunk_size == 0 {
            bail!("listening.chunk_size must be greater than 0");
        }
        if l.silence_threshold <= 0.0 {
            bail!("listening.silence_threshold must be positive");
        }
        if l.silence_time_to_stop_secs <= 0.0 || l.max_recording_secs <= 0.0 {
            bail!("listening timeouts must be positive");
        }
        if l.max_wait_secs <= 0.0 {
            bail!("listening.max_wait_secs must be positive");
        }
        if l.pre_buffer_secs < 0.0 {
            bail!("listening.pre_buffer_secs cannot be negative");
        }
        if !l.use_dynamic_listening && l.fixed_recording_secs <= 0.0 {
            bail!("listening.fixed_recording_secs must be positive");
        }
        if self.polling.interval_secs <= 0.0 {
            bail!("polling.interval_secs must be positive");
        }
        if self.polling.max_retries == 0 {
            bail!("polling.max_retries must be at least 1");
        }
        if self.playback.format_priority.is_empty() && !self.playback.manual_wav_fallback {
            bail!("playback needs at least one decode format or the manual WAV fallback");
        }
        if self.backend.base_url.trim().is_empty() {
            bail!("backend.base_url cannot be empty");
        }
        Ok(())
    }

    /// Load configuration from a file, falling back to defaults when it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents).context("Failed to parse config")?;

        let original_version = config.version;
        let migrated = migrate_config(config)?;
        if migrated.version != original_version {
            tracing::info!(
                "Migrated config from version {} to {}",
                original_version,
                migrated.version
            );
            migrated.save_to(path)?;
        }

        Ok(migrated)
    }

    /// Save configuration to a file, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialise config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        tracing::debug!("Config saved to {}", path.display());
        Ok(())
    }
}

/// Get the path to the config directory (~/.colloquy)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| {
            tracing::error!("Could not determine home directory, using /tmp");
            PathBuf::from("/tmp")
        })
        .join(".colloquy")
}

/// Get the path to the config file (~/.colloquy/config.json)
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Migrate configuration from older schema versions
fn migrate_config(mut config: Config) -> Result<Config> {
    if config.version > CURRENT_VERSION {
        return Err(anyhow!("Unknown config version: {}", config.version));
    }
    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }
    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config> {
    match config.version {
        // Version 0 -> 1: initial schema
        0 => Ok(Config {
            version: 1,
            ..config
        }),
        // Version 1 -> 2: the format list gained the ogg entry; older files
        // that pinned the list keep their order and get ogg appended
        1 => {
            let mut migrated = config;
            if !migrated.playback.format_priority.contains(&AudioFormat::Ogg) {
                migrated.playback.format_priority.push(AudioFormat::Ogg);
            }
            migrated.version = 2;
            Ok(migrated)
        }
        v => Err(anyhow!("Unknown config version: {}", v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_current_version() {
        let config = Config::default();
        assert_eq!(config.version, CURRENT_VERSION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listening_defaults() {
        let listening = ListeningConfig::default();
        assert_eq!(listening.sample_rate, 16000);
        assert_eq!(listening.chunk_size, 1024);
        assert!((listening.silence_threshold - 0.005).abs() < f32::EPSILON);
        assert!((listening.silence_time_to_stop_secs - 5.0).abs() < f32::EPSILON);
        assert!(listening.use_dynamic_listening);
        assert!(listening.use_automatic_listening);
        assert!(!listening.debug_audio_levels);
    }

    #[test]
    fn test_polling_defaults() {
        let polling = PollingConfig::default();
        assert_eq!(polling.max_retries, 30);
        assert_eq!(polling.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_playback_defaults() {
        let playback = PlaybackConfig::default();
        assert_eq!(
            playback.format_priority,
            vec![AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Ogg]
        );
        assert!(playback.manual_wav_fallback);
    }

    #[test]
    fn test_response_mode_serialisation() {
        assert_eq!(
            serde_json::to_string(&ResponseMode::Polling).unwrap(),
            "\"polling\""
        );
        assert_eq!(
            serde_json::from_str::<ResponseMode>("\"blocking\"").unwrap(),
            ResponseMode::Blocking
        );
    }

    #[test]
    fn test_partial_config_deserialisation() {
        let json = r#"{"version": 2, "listening": {"silence_threshold": 0.02}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert!((config.listening.silence_threshold - 0.02).abs() < f32::EPSILON);
        assert_eq!(config.listening.chunk_size, 1024);
        assert_eq!(config.polling.max_retries, 30);
    }

    #[test]
    fn test_migration_from_version_0() {
        let old_config = Config {
            version: 0,
            ..Default::default()
        };
        let migrated = migrate_config(old_config).unwrap();
        assert_eq!(migrated.version, CURRENT_VERSION);
    }

    #[test]
    fn test_migration_appends_ogg() {
        let mut old_config = Config {
            version: 1,
            ..Default::default()
        };
        old_config.playback.format_priority = vec![AudioFormat::Wav];

        let migrated = migrate_config(old_config).unwrap();
        assert_eq!(
            migrated.playback.format_priority,
            vec![AudioFormat::Wav, AudioFormat::Ogg]
        );
    }

    #[test]
    fn test_future_version_rejected() {
        let future = Config {
            version: 999,
            ..Default::default()
        };
        let err = migrate_config(future).unwrap_err();
        assert!(err.to_string().contains("Unknown config version"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = Config::default();
        config.polling.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_path_format() {
        let path = default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains(".colloquy"));
        assert!(path_str.ends_with("config.json"));
    }
}
