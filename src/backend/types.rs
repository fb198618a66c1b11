//! Backend wire payloads and the domain values built from them

use crate::error::VoiceError;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Timing of one spoken word within a response, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Encoded audio returned by the backend, plus what it says
#[derive(Debug, Clone, Default)]
pub struct AudioAsset {
    /// Encoded bytes as received; the container is unknown until decoded
    pub raw_bytes: Vec<u8>,
    /// Transcript of the audio, for logging and lip-sync
    pub text: String,
    /// Backend's estimate of the spoken length
    pub estimated_duration: Option<f64>,
    pub word_timings: Vec<WordTiming>,
}

impl AudioAsset {
    pub fn new(raw_bytes: Vec<u8>, text: impl Into<String>) -> Self {
        Self {
            raw_bytes,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn has_audio(&self) -> bool {
        !self.raw_bytes.is_empty()
    }
}

/// Decode optional inline base64 audio; absent or empty means no audio
pub fn decode_inline_audio(encoded: Option<&str>) -> Result<Vec<u8>, VoiceError> {
    match encoded.map(str::trim) {
        Some(data) if !data.is_empty() => {
            Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
        }
        _ => Ok(Vec::new()),
    }
}

/// Body for calls scoped to a session
#[derive(Debug, Serialize)]
pub struct SessionRequest<'a> {
    pub session_id: &'a str,
}

/// Body for response generation (submitted or blocking)
#[derive(Debug, Serialize)]
pub struct ResponseRequest<'a> {
    pub text: &'a str,
    pub session_id: &'a str,
}

/// Reply to `start_session`
#[derive(Debug, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub welcome_text: Option<String>,
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub estimated_duration: Option<f64>,
}

/// Reply to `transcribe`
#[derive(Debug, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
}

/// Text plus inline audio, as returned for fillers and blocking responses
#[derive(Debug, Deserialize)]
pub struct SpokenReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub estimated_duration: Option<f64>,
    #[serde(default)]
    pub word_timings: Vec<WordTiming>,
}

impl SpokenReply {
    pub fn into_asset(self) -> Result<AudioAsset, VoiceError> {
        Ok(AudioAsset {
            raw_bytes: decode_inline_audio(self.audio_base64.as_deref())?,
            text: self.text,
            estimated_duration: self.estimated_duration,
            word_timings: self.word_timings,
        })
    }
}

/// Acknowledgement of a submitted response request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Reply to `poll_response`
#[derive(Debug, Deserialize)]
pub struct PollResponse {
    pub completed: bool,
    #[serde(flatten)]
    pub reply: SpokenReply,
}

/// Outcome of one poll
#[derive(Debug, Clone)]
pub enum PollReply {
    Pending,
    /// Generation finished; the asset may carry no audio
    Completed(AudioAsset),
}

impl TryFrom<PollResponse> for PollReply {
    type Error = VoiceError;

    fn try_from(response: PollResponse) -> Result<Self, Self::Error> {
        if !response.completed {
            return Ok(PollReply::Pending);
        }
        Ok(PollReply::Completed(response.reply.into_asset()?))
    }
}

/// Session details returned at startup
#[derive(Debug, Clone)]
pub struct SessionGreeting {
    pub session_id: String,
    /// Welcome audio to play before the first turn
    pub welcome: Option<AudioAsset>,
}

impl TryFrom<StartSessionResponse> for SessionGreeting {
    type Error = VoiceError;

    fn try_from(response: StartSessionResponse) -> Result<Self, Self::Error> {
        if response.session_id.trim().is_empty() {
            return Err(VoiceError::MalformedPayload(
                "start_session returned an empty session id".to_string(),
            ));
        }
        let raw_bytes = decode_inline_audio(response.audio_base64.as_deref())?;
        let welcome = (!raw_bytes.is_empty() || response.welcome_text.is_some()).then(|| AudioAsset {
            raw_bytes,
            text: response.welcome_text.unwrap_or_default(),
            estimated_duration: response.estimated_duration,
            word_timings: Vec::new(),
        });
        Ok(SessionGreeting {
            session_id: response.session_id,
            welcome,
        })
    }
}
