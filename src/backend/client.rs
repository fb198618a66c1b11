//! HTTP client for the conversation backend
//!
//! The backend does recognition, generation and synthesis; this side only
//! sequences calls. Every call is a single attempt: retry policy belongs to
//! the poller, and everything else fails the turn.

use super::types::{
    AudioAsset, PollReply, PollResponse, ResponseRequest, SessionGreeting, SessionRequest,
    SpokenReply, StartSessionResponse, SubmitAck, TranscribeResponse,
};
use crate::config::BackendConfig;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// File name used for uploaded recordings
const UPLOAD_FILE_NAME: &str = "recording.wav";

/// Operations offered by the speech and language backend
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Open a session; may carry welcome audio
    async fn start_session(&self) -> VoiceResult<SessionGreeting>;

    /// Transcribe a WAV recording
    async fn transcribe(&self, wav: Vec<u8>) -> VoiceResult<String>;

    /// Fetch a short filler utterance
    async fn get_filler(&self) -> VoiceResult<AudioAsset>;

    /// Start asynchronous response generation
    async fn submit_response(&self, session_id: &str, text: &str) -> VoiceResult<SubmitAck>;

    /// Ask whether the submitted response is ready
    async fn poll_response(&self, session_id: &str) -> VoiceResult<PollReply>;

    /// Generate a response synchronously
    async fn get_response(&self, session_id: &str, text: &str) -> VoiceResult<AudioAsset>;

    /// Retrieve the latest response audio directly
    async fn fetch_audio(&self, session_id: &str) -> VoiceResult<Vec<u8>>;

    /// Close the session; closing an unknown session succeeds
    async fn end_session(&self, session_id: &str) -> VoiceResult<()>;
}

/// reqwest implementation of [`ConversationBackend`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> VoiceResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn transport and status failures into `VoiceError`
    async fn check(response: reqwest::Response) -> VoiceResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(VoiceError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> VoiceResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn start_session(&self) -> VoiceResult<SessionGreeting> {
        let response: StartSessionResponse =
            self.post_json("start_session", &serde_json::json!({})).await?;
        let greeting = SessionGreeting::try_from(response)?;
        tracing::info!("Started session {}", greeting.session_id);
        Ok(greeting)
    }

    async fn transcribe(&self, wav: Vec<u8>) -> VoiceResult<String> {
        let size = wav.len();
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name(UPLOAD_FILE_NAME)
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        tracing::debug!("Uploading {} bytes for transcription", size);
        let response = self
            .client
            .post(self.url("transcribe"))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let bytes = response.bytes().await?;
        let reply: TranscribeResponse = serde_json::from_slice(&bytes)?;
        Ok(reply.text.trim().to_string())
    }

    async fn get_filler(&self) -> VoiceResult<AudioAsset> {
        let reply: SpokenReply = self.post_json("get_filler", &serde_json::json!({})).await?;
        reply.into_asset()
    }

    async fn submit_response(&self, session_id: &str, text: &str) -> VoiceResult<SubmitAck> {
        let body = ResponseRequest { text, session_id };
        let ack: SubmitAck = self.post_json("request_response", &body).await?;
        tracing::debug!("Response request accepted: {:?}", ack.request_id);
        Ok(ack)
    }

    async fn poll_response(&self, session_id: &str) -> VoiceResult<PollReply> {
        let response: PollResponse = self
            .post_json("poll_response", &SessionRequest { session_id })
            .await?;
        PollReply::try_from(response)
    }

    async fn get_response(&self, session_id: &str, text: &str) -> VoiceResult<AudioAsset> {
        let body = ResponseRequest { text, session_id };
        let reply: SpokenReply = self.post_json("get_response", &body).await?;
        reply.into_asset()
    }

    async fn fetch_audio(&self, session_id: &str) -> VoiceResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url("get_audio"))
            .query(&[("session_id", session_id)])
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn end_session(&self, session_id: &str) -> VoiceResult<()> {
        let response = self
            .client
            .post(self.url("end_session"))
            .json(&SessionRequest { session_id })
            .send()
            .await?;

        match Self::check(response).await {
            Ok(_) => {
                tracing::info!("Ended session {}", session_id);
                Ok(())
            }
            Err(VoiceError::Backend { status: 404, .. }) => {
                tracing::debug!("Session {} was already closed", session_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
