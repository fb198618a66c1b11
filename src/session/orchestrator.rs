//! Conversation orchestrator
//!
//! Runs the listen, transcribe, respond, speak loop on one task. Each step
//! moves the state machine, and the device claims make sure the microphone
//! is released before anything is played and the speaker is released (plus
//! the post-speech delay) before the microphone is armed again.
//!
//! Commands from an [`OrchestratorHandle`] are picked up while listening,
//! while paused and while speaking. Commands that arrive during the request
//! phase of a turn wait in the queue until the turn ends.

use super::claims::{DeviceClaim, DeviceClaims};
use super::state::{ConversationState, ConversationStateMachine, SessionEvent};
use crate::audio::{
    encode_wav, AudioInput, AudioPipeline, ListenOutcome, PlaybackTask, SpeechSegment, VadConfig,
    VadEvent, VoiceActivityDetector,
};
use crate::backend::{AudioAsset, ConversationBackend, ResponsePoller};
use crate::config::{Config, ResponseMode};
use crate::error::{VoiceError, VoiceResult};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Wait before re-opening a capture device that failed
const DEVICE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Wait between attempts to open a backend session
const SESSION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Commands accepted from outside the run loop
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Stop listening, keep the session
    Pause,
    Resume,
    /// Start a capture in manual listening mode
    Trigger,
    /// Play audio now, pre-empting any capture in progress
    Speak(AudioAsset),
    /// Close the session and stop the loop
    End,
}

/// Cloneable remote control for a running [`Orchestrator`]
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    state: watch::Receiver<ConversationState>,
}

impl OrchestratorHandle {
    fn send(&self, command: OrchestratorCommand) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VoiceError::Cancelled)
    }

    pub fn pause(&self) -> VoiceResult<()> {
        self.send(OrchestratorCommand::Pause)
    }

    pub fn resume(&self) -> VoiceResult<()> {
        self.send(OrchestratorCommand::Resume)
    }

    pub fn trigger(&self) -> VoiceResult<()> {
        self.send(OrchestratorCommand::Trigger)
    }

    pub fn speak(&self, asset: AudioAsset) -> VoiceResult<()> {
        self.send(OrchestratorCommand::Speak(asset))
    }

    pub fn end(&self) -> VoiceResult<()> {
        self.send(OrchestratorCommand::End)
    }

    /// Current conversation state
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }
}

/// One dialogue with the backend
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub session_id: String,
    /// Correlation id of the response currently being generated
    pub pending_request_id: Option<String>,
    pub started_at: DateTime<Local>,
}

impl ConversationSession {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            pending_request_id: None,
            started_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// A delivered line of the conversation
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// Whether the line was heard as audio (always true for the user)
    pub audio_played: bool,
    pub at: DateTime<Local>,
}

/// Playback holding the speaker claim until it finishes
struct ActivePlayback {
    task: PlaybackTask,
    _claim: DeviceClaim,
}

impl ActivePlayback {
    async fn finish(self) {
        let ActivePlayback { task, _claim } = self;
        if let Err(e) = task.wait().await {
            tracing::warn!("Playback ended with an error: {}", e);
        }
    }
}

enum ListenStep {
    Finished(VoiceResult<ListenOutcome>),
    Command(OrchestratorCommand),
}

/// Lowercase, strip punctuation and collapse whitespace
fn normalise_phrase(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `text` contains any of `phrases` as whole words
pub fn contains_exit_phrase(text: &str, phrases: &[String]) -> bool {
    let padded = format!(" {} ", normalise_phrase(text));
    phrases
        .iter()
        .map(|p| normalise_phrase(p))
        .filter(|p| !p.is_empty())
        .any(|p| padded.contains(&format!(" {} ", p)))
}

/// Drives a conversation from session start to end
pub struct Orchestrator {
    config: Config,
    backend: Arc<dyn ConversationBackend>,
    input: Arc<dyn AudioInput>,
    pipeline: AudioPipeline,
    poller: ResponsePoller,
    vad: VoiceActivityDetector,
    machine: ConversationStateMachine,
    claims: DeviceClaims,
    session: Option<ConversationSession>,
    transcript: Vec<TranscriptEntry>,
    command_tx: mpsc::UnboundedSender<OrchestratorCommand>,
    command_rx: mpsc::UnboundedReceiver<OrchestratorCommand>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        backend: Arc<dyn ConversationBackend>,
        input: Arc<dyn AudioInput>,
        pipeline: AudioPipeline,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let poller = ResponsePoller::new(backend.clone(), &config.polling);
        let vad = VoiceActivityDetector::new(VadConfig::from(&config.listening));

        Self {
            config,
            backend,
            input,
            pipeline,
            poller,
            vad,
            machine: ConversationStateMachine::new(),
            claims: DeviceClaims::new(),
            session: None,
            transcript: Vec::new(),
            command_tx,
            command_rx,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            commands: self.command_tx.clone(),
            state: self.machine.subscribe(),
        }
    }

    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    /// States entered so far, oldest first
    pub fn history(&self) -> &[ConversationState] {
        self.machine.history()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }

    /// Device claim flags, shared with the running loop
    pub fn claims(&self) -> DeviceClaims {
        self.claims.clone()
    }

    /// Run until the conversation ends.
    ///
    /// Backend and device failures never end the loop: session setup is
    /// retried and a failed turn goes back to listening. Only an `End`
    /// command or an exit phrase stops it.
    pub async fn run(&mut self) -> VoiceResult<()> {
        self.establish_session().await;

        while !self.machine.state().is_terminal() {
            match self.machine.state() {
                ConversationState::Listening => self.listen_turn().await,
                ConversationState::Paused => self.wait_while_paused().await,
                other => {
                    tracing::error!("Run loop found {:?} outside a turn, recovering", other);
                    self.fail(VoiceError::StateConflict(format!("stray state {:?}", other)));
                    if self.machine.state() == other {
                        self.fire(SessionEvent::End);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// End the backend session and move to `Ended`. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            match self.backend.end_session(&session.session_id).await {
                Ok(()) => tracing::info!(
                    "Conversation {} closed after {} lines",
                    session.session_id,
                    self.transcript.len()
                ),
                Err(e) => tracing::warn!("Failed to end session {}: {}", session.session_id, e),
            }
        }
        if !self.machine.state().is_terminal() {
            self.fire(SessionEvent::End);
        }
    }

    /// Feed an event to the state machine; a rejected event is a logged no-op
    fn fire(&mut self, event: SessionEvent) -> bool {
        let label = format!("{:?}", event);
        match self.machine.process_event(event) {
            Some(_) => true,
            None => {
                tracing::warn!(
                    "State conflict: {} ignored while {:?}",
                    label,
                    self.machine.state()
                );
                false
            }
        }
    }

    fn fail(&mut self, error: VoiceError) {
        tracing::warn!("Turn failed ({}): {}", error.kind(), error);
        self.fire(SessionEvent::TurnFailed {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn session_id(&self) -> VoiceResult<String> {
        self.session
            .as_ref()
            .map(|s| s.session_id.clone())
            .ok_or_else(|| VoiceError::StateConflict("no active session".to_string()))
    }

    fn record(&mut self, speaker: Speaker, text: &str, audio_played: bool) {
        if text.trim().is_empty() {
            return;
        }
        tracing::info!("{:?}: {}", speaker, text);
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
            audio_played,
            at: Local::now(),
        });
    }

    /// Keep trying to open a session until one starts or the user ends
    async fn establish_session(&mut self) {
        let mut attempts = 0u32;
        while self.machine.state() == ConversationState::Idle {
            attempts += 1;
            match self.start_session().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        "Could not start a conversation session (attempt {}), retrying in {:?}: {}",
                        attempts,
                        SESSION_RETRY_DELAY,
                        e
                    );
                    self.idle_for(SESSION_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn start_session(&mut self) -> VoiceResult<()> {
        let greeting = self.backend.start_session().await?;
        self.session = Some(ConversationSession::new(greeting.session_id));

        match greeting.welcome {
            Some(welcome) if welcome.has_audio() => {
                self.fire(SessionEvent::WelcomeReceived);
                self.speak(welcome).await;
            }
            Some(welcome) => {
                self.record(Speaker::Assistant, &welcome.text, false);
                self.fire(SessionEvent::SessionStarted);
            }
            None => {
                self.fire(SessionEvent::SessionStarted);
            }
        }
        Ok(())
    }

    async fn apply_command(&mut self, command: OrchestratorCommand) {
        tracing::debug!("Command: {:?}", command);
        match command {
            OrchestratorCommand::Pause => {
                self.fire(SessionEvent::Pause);
            }
            OrchestratorCommand::Resume => {
                self.fire(SessionEvent::Resume);
            }
            OrchestratorCommand::Trigger => {
                tracing::debug!("Trigger ignored while {:?}", self.machine.state());
            }
            OrchestratorCommand::Speak(asset) => {
                if self.fire(SessionEvent::SpeakRequested) {
                    self.speak(asset).await;
                }
            }
            OrchestratorCommand::End => {
                self.fire(SessionEvent::End);
            }
        }
    }

    async fn next_command(&mut self) -> OrchestratorCommand {
        self.command_rx
            .recv()
            .await
            .unwrap_or(OrchestratorCommand::End)
    }

    async fn wait_while_paused(&mut self) {
        let command = self.next_command().await;
        self.apply_command(command).await;
    }

    /// Sleep, but let a command cut the wait short
    async fn idle_for(&mut self, delay: Duration) {
        let command = tokio::select! {
            _ = tokio::time::sleep(delay) => None,
            command = self.command_rx.recv() => Some(command.unwrap_or(OrchestratorCommand::End)),
        };
        if let Some(command) = command {
            self.apply_command(command).await;
        }
    }

    async fn listen_turn(&mut self) {
        if !self.config.listening.use_automatic_listening {
            match self.next_command().await {
                OrchestratorCommand::Trigger => {}
                command => {
                    self.apply_command(command).await;
                    return;
                }
            }
        }

        let microphone = match self.claims.claim_microphone() {
            Ok(claim) => claim,
            Err(e) => {
                tracing::warn!("Not listening: {}", e);
                self.idle_for(DEVICE_RETRY_DELAY).await;
                return;
            }
        };

        let step = {
            let Self {
                vad,
                machine,
                input,
                command_rx,
                ..
            } = self;

            let mut on_event = |event: VadEvent| match event {
                VadEvent::SpeechStart { waited_secs } => {
                    tracing::debug!("Speech started after {:.2}s", waited_secs);
                    machine.process_event(SessionEvent::SpeechOnset);
                }
                VadEvent::SpeechEnd {
                    duration_secs,
                    reason,
                } => {
                    tracing::debug!("Speech ended after {:.2}s ({:?})", duration_secs, reason);
                }
            };

            let listen = vad.listen(&**input, &mut on_event);
            tokio::pin!(listen);

            // Dropping `listen` closes the input stream
            loop {
                tokio::select! {
                    result = &mut listen => break ListenStep::Finished(result),
                    command = command_rx.recv() => match command {
                        Some(OrchestratorCommand::Trigger) => {
                            tracing::debug!("Already listening");
                        }
                        Some(command) => break ListenStep::Command(command),
                        None => break ListenStep::Command(OrchestratorCommand::End),
                    },
                }
            }
        };
        drop(microphone);

        match step {
            ListenStep::Finished(Ok(ListenOutcome::Segment(segment))) => {
                if self.fire(SessionEvent::SegmentCaptured) {
                    self.process_segment(segment).await;
                }
            }
            ListenStep::Finished(Ok(ListenOutcome::NoSpeechDetected)) => {
                self.fire(SessionEvent::NoSpeechDetected);
            }
            ListenStep::Finished(Err(e)) => {
                let device_missing = matches!(e, VoiceError::DeviceUnavailable(_));
                self.fail(e);
                if device_missing {
                    self.idle_for(DEVICE_RETRY_DELAY).await;
                }
            }
            ListenStep::Command(command) => self.apply_command(command).await,
        }
    }

    async fn process_segment(&mut self, segment: SpeechSegment) {
        let wav = match encode_wav(&segment) {
            Ok(wav) => wav,
            Err(e) => return self.fail(e),
        };

        tracing::info!(
            "Transcribing {:.2}s of speech ({} bytes)",
            segment.duration_seconds,
            wav.len()
        );
        let text = match self.backend.transcribe(wav).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                return self.fail(VoiceError::MalformedPayload(
                    "transcription returned no text".to_string(),
                ))
            }
            Err(e) => return self.fail(e),
        };
        self.record(Speaker::User, &text, true);

        if contains_exit_phrase(&text, &self.config.conversation.exit_phrases) {
            tracing::info!("Exit phrase heard, ending conversation");
            self.fire(SessionEvent::ExitPhraseHeard { text });
            return;
        }
        self.fire(SessionEvent::TranscriptReceived { text: text.clone() });

        let filler = self.start_filler().await;
        let response = self.request_response(&text).await;

        // The filler keeps the speaker until it has finished
        let filler_played = filler.is_some();
        if let Some(filler) = filler {
            filler.finish().await;
        }

        match response {
            Ok(asset) => self.deliver_response(asset).await,
            Err(e) => {
                if filler_played {
                    tokio::time::sleep(self.config.playback.post_speech_wait()).await;
                }
                self.fail(e);
            }
        }
    }

    async fn start_filler(&mut self) -> Option<ActivePlayback> {
        if !self.config.conversation.play_filler {
            self.fire(SessionEvent::FillerSkipped);
            return None;
        }

        let playback = match self.backend.get_filler().await {
            Ok(asset) if asset.has_audio() => match self.claims.claim_speaker() {
                Ok(claim) => match self.pipeline.start(asset).await {
                    Ok(task) => Some(ActivePlayback {
                        task,
                        _claim: claim,
                    }),
                    Err(e) => {
                        tracing::warn!("Filler could not be played: {}", e);
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!("Filler skipped: {}", e);
                    None
                }
            },
            Ok(_) => {
                tracing::debug!("Backend returned a filler without audio");
                None
            }
            Err(e) => {
                tracing::warn!("Failed to fetch filler: {}", e);
                None
            }
        };

        self.fire(if playback.is_some() {
            SessionEvent::FillerStarted
        } else {
            SessionEvent::FillerSkipped
        });
        playback
    }

    async fn request_response(&mut self, text: &str) -> VoiceResult<AudioAsset> {
        let session_id = self.session_id()?;

        match self.config.conversation.response_mode {
            ResponseMode::Blocking => self.backend.get_response(&session_id, text).await,
            ResponseMode::Polling => {
                let mut request = self.poller.submit(&session_id, text).await?;
                if let Some(session) = self.session.as_mut() {
                    session.pending_request_id = request.request_id.clone();
                }
                self.fire(SessionEvent::ResponseSubmitted);

                let result = self.poller.poll_until_complete(&mut request).await;
                if let Some(session) = self.session.as_mut() {
                    session.pending_request_id = None;
                }
                result
            }
        }
    }

    async fn deliver_response(&mut self, mut asset: AudioAsset) {
        if !asset.has_audio() {
            // One direct fetch before settling for text only
            match self.session_id() {
                Ok(session_id) => match self.backend.fetch_audio(&session_id).await {
                    Ok(bytes) => asset.raw_bytes = bytes,
                    Err(e) => tracing::warn!("Direct audio fetch failed: {}", e),
                },
                Err(e) => tracing::warn!("{}", e),
            }
        }

        if !asset.has_audio() {
            self.record(Speaker::Assistant, &asset.text, false);
            self.fire(SessionEvent::TextOnlyResponse);
            return;
        }

        if self.fire(SessionEvent::ResponseReady) {
            self.speak(asset).await;
        }
    }

    /// Play `asset` in the `Speaking` state, then wait and re-arm listening
    async fn speak(&mut self, asset: AudioAsset) {
        let text = asset.text.clone();

        let played = match self.claims.claim_speaker() {
            Ok(claim) => match self.pipeline.start(asset).await {
                Ok(task) => {
                    self.await_playback(ActivePlayback {
                        task,
                        _claim: claim,
                    })
                    .await
                }
                Err(e) => {
                    tracing::warn!("Audio not played, text still delivered: {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Audio not played: {}", e);
                false
            }
        };
        self.record(Speaker::Assistant, &text, played);

        if self.machine.state().is_terminal() {
            return;
        }
        tokio::time::sleep(self.config.playback.post_speech_wait()).await;
        self.fire(SessionEvent::PlaybackFinished);
    }

    /// Wait for playback while still answering commands. Returns whether the clip played to the end.
    async fn await_playback(&mut self, playback: ActivePlayback) -> bool {
        let ActivePlayback { task, _claim } = playback;
        let wait = task.wait();
        tokio::pin!(wait);

        loop {
            let command = tokio::select! {
                result = &mut wait => {
                    return match result {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!("Playback failed: {}", e);
                            false
                        }
                    };
                }
                command = self.command_rx.recv() => command.unwrap_or(OrchestratorCommand::End),
            };

            match command {
                OrchestratorCommand::End => {
                    // Dropping `wait` stops the device; the clip was cut short
                    self.fire(SessionEvent::End);
                    return false;
                }
                other => tracing::warn!("State conflict: {:?} ignored while speaking", other),
            }
        }
    }
}
