//! Conversation state machine
//!
//! Every state change in a conversation goes through
//! `ConversationStateMachine::process_event`. The table there is the only
//! place that decides which state may follow which, so the rule that the
//! microphone is only armed in `Listening`/`Recording` and the speaker only
//! after capture has stopped lives in one match.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::watch;

/// Number of past states kept for inspection
const HISTORY_LIMIT: usize = 256;

/// Conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No session yet
    #[default]
    Idle,
    /// Microphone armed, waiting for speech
    Listening,
    /// Speech onset detected, capturing
    Recording,
    /// Uploading the segment for transcription
    Transcribing,
    /// Filler utterance starting
    PlayingFiller,
    /// Response generation being requested
    RequestingResponse,
    /// Waiting for the backend to finish the response
    PollingResponse,
    /// Response (or welcome, or injected) audio playing
    Speaking,
    /// Explicitly paused; session preserved
    Paused,
    /// Session closed
    Ended,
}

impl ConversationState {
    pub fn description(&self) -> &'static str {
        match self {
            ConversationState::Idle => "Waiting for a session",
            ConversationState::Listening => "Listening for speech",
            ConversationState::Recording => "Recording speech",
            ConversationState::Transcribing => "Transcribing speech",
            ConversationState::PlayingFiller => "Playing filler",
            ConversationState::RequestingResponse => "Requesting response",
            ConversationState::PollingResponse => "Waiting for response",
            ConversationState::Speaking => "Speaking",
            ConversationState::Paused => "Paused",
            ConversationState::Ended => "Conversation ended",
        }
    }

    /// States in which the microphone may be claimed
    pub fn is_capturing_audio(&self) -> bool {
        matches!(self, ConversationState::Listening | ConversationState::Recording)
    }

    /// States in which the speaker may be claimed
    pub fn may_play_audio(&self) -> bool {
        matches!(
            self,
            ConversationState::PlayingFiller
                | ConversationState::RequestingResponse
                | ConversationState::PollingResponse
                | ConversationState::Speaking
        )
    }

    /// States a pause request is honoured in
    pub fn is_pausable(&self) -> bool {
        self.is_capturing_audio()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationState::Ended)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session established, nothing to play first
    SessionStarted,
    /// Session established with welcome audio
    WelcomeReceived,
    /// VAD heard speech
    SpeechOnset,
    /// VAD finished a segment
    SegmentCaptured,
    /// VAD gave up waiting for speech
    NoSpeechDetected,
    /// Transcription returned text
    TranscriptReceived { text: String },
    /// Transcript contained an exit phrase
    ExitPhraseHeard { text: String },
    /// Filler playback began
    FillerStarted,
    /// Filler disabled or unavailable
    FillerSkipped,
    /// Response request accepted; polling follows
    ResponseSubmitted,
    /// Response audio is ready to play
    ResponseReady,
    /// Response arrived with text but no playable audio
    TextOnlyResponse,
    /// Speaker finished and the post-speech delay elapsed
    PlaybackFinished,
    /// Audio injected from outside the turn
    SpeakRequested,
    Pause,
    Resume,
    /// Any failure in the current turn
    TurnFailed { kind: ErrorKind, message: String },
    /// Session closed or torn down
    End,
}

/// Reason for entering a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    SessionEstablished,
    WelcomeAudio,
    VoiceActivity,
    EndOfSpeech,
    NoSpeech,
    TranscriptionSuccess,
    ExitPhrase,
    FillerPlaying,
    FillerSkipped,
    ResponseSubmitted,
    ResponseReady,
    TextOnly,
    PlaybackComplete,
    InjectedSpeech,
    UserPause,
    UserResume,
    Error { kind: String, message: String },
    SessionEnded,
}

/// Additional data from a state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionData {
    Transcript { text: String },
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub previous_state: ConversationState,
    pub new_state: ConversationState,
    pub reason: TransitionReason,
    pub data: Option<TransitionData>,
}

/// The conversation state machine
pub struct ConversationStateMachine {
    state: ConversationState,
    state_entered_at: Instant,
    history: Vec<ConversationState>,
    observer: watch::Sender<ConversationState>,
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        let (observer, _) = watch::channel(ConversationState::Idle);
        Self {
            state: ConversationState::Idle,
            state_entered_at: Instant::now(),
            history: vec![ConversationState::Idle],
            observer,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// States entered so far, oldest first (bounded)
    pub fn history(&self) -> &[ConversationState] {
        &self.history
    }

    /// Watch the current state from another task
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.observer.subscribe()
    }

    /// Process an event and return the transition result if a transition occurred
    ///
    /// Returns `None` if the event is not valid for the current state. The
    /// caller treats that as a state conflict: logged, otherwise ignored.
    pub fn process_event(&mut self, event: SessionEvent) -> Option<TransitionResult> {
        use ConversationState as S;
        use SessionEvent as E;

        let (new_state, reason, data) = match (self.state, event) {
            // Ended absorbs everything
            (S::Ended, _) => return None,

            (_, E::End) => (S::Ended, TransitionReason::SessionEnded, None),

            // IDLE
            (S::Idle, E::SessionStarted) => (S::Listening, TransitionReason::SessionEstablished, None),
            (S::Idle, E::WelcomeReceived) => (S::Speaking, TransitionReason::WelcomeAudio, None),

            // LISTENING / RECORDING
            (S::Listening, E::SpeechOnset) => (S::Recording, TransitionReason::VoiceActivity, None),
            (S::Recording, E::SegmentCaptured) => {
                (S::Transcribing, TransitionReason::EndOfSpeech, None)
            }
            (S::Listening | S::Recording, E::NoSpeechDetected) => {
                (S::Listening, TransitionReason::NoSpeech, None)
            }
            (S::Listening | S::Recording, E::Pause) => (S::Paused, TransitionReason::UserPause, None),
            (S::Listening | S::Recording, E::SpeakRequested) => {
                (S::Speaking, TransitionReason::InjectedSpeech, None)
            }

            // PAUSED
            (S::Paused, E::Resume) => (S::Listening, TransitionReason::UserResume, None),

            // TRANSCRIBING
            (S::Transcribing, E::TranscriptReceived { text }) => (
                S::PlayingFiller,
                TransitionReason::TranscriptionSuccess,
                Some(TransitionData::Transcript { text }),
            ),
            (S::Transcribing, E::ExitPhraseHeard { text }) => (
                S::Ended,
                TransitionReason::ExitPhrase,
                Some(TransitionData::Transcript { text }),
            ),

            // PLAYING FILLER
            (S::PlayingFiller, E::FillerStarted) => {
                (S::RequestingResponse, TransitionReason::FillerPlaying, None)
            }
            (S::PlayingFiller, E::FillerSkipped) => {
                (S::RequestingResponse, TransitionReason::FillerSkipped, None)
            }

            // REQUESTING / POLLING
            (S::RequestingResponse, E::ResponseSubmitted) => {
                (S::PollingResponse, TransitionReason::ResponseSubmitted, None)
            }
            (S::RequestingResponse | S::PollingResponse, E::ResponseReady) => {
                (S::Speaking, TransitionReason::ResponseReady, None)
            }
            (S::RequestingResponse | S::PollingResponse, E::TextOnlyResponse) => {
                (S::Listening, TransitionReason::TextOnly, None)
            }

            // SPEAKING
            (S::Speaking, E::PlaybackFinished) => {
                (S::Listening, TransitionReason::PlaybackComplete, None)
            }

            // Every in-turn failure goes back to listening
            (
                S::Listening
                | S::Recording
                | S::Transcribing
                | S::PlayingFiller
                | S::RequestingResponse
                | S::PollingResponse
                | S::Speaking,
                E::TurnFailed { kind, message },
            ) => (
                S::Listening,
                TransitionReason::Error {
                    kind: kind.to_string(),
                    message,
                },
                None,
            ),

            (state, event) => {
                tracing::debug!("Ignoring {:?} in state {:?}", event, state);
                return None;
            }
        };

        let result = TransitionResult {
            previous_state: self.state,
            new_state,
            reason,
            data,
        };
        self.apply_transition(&result);
        Some(result)
    }

    fn apply_transition(&mut self, result: &TransitionResult) {
        self.state = result.new_state;
        self.state_entered_at = Instant::now();

        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(result.new_state);
        self.observer.send_replace(result.new_state);

        tracing::info!(
            "Conversation state transition: {:?} -> {:?} (reason: {:?})",
            result.previous_state,
            result.new_state,
            result.reason
        );
    }
}

impl Default for ConversationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(events: Vec<SessionEvent>) -> ConversationStateMachine {
        let mut sm = ConversationStateMachine::new();
        for event in events {
            assert!(sm.process_event(event).is_some());
        }
        sm
    }

    fn failure() -> SessionEvent {
        SessionEvent::TurnFailed {
            kind: ErrorKind::NetworkFailure,
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_initial_state_is_idle() {
        let sm = ConversationStateMachine::new();
        assert_eq!(sm.state(), ConversationState::Idle);
        assert_eq!(sm.history(), &[ConversationState::Idle]);
    }

    #[test]
    fn test_full_polling_turn() {
        let sm = machine_in(vec![
            SessionEvent::SessionStarted,
            SessionEvent::SpeechOnset,
            SessionEvent::SegmentCaptured,
            SessionEvent::TranscriptReceived {
                text: "hello".to_string(),
            },
            SessionEvent::FillerStarted,
            SessionEvent::ResponseSubmitted,
            SessionEvent::ResponseReady,
            SessionEvent::PlaybackFinished,
        ]);

        use ConversationState::*;
        assert_eq!(
            sm.history(),
            &[
                Idle,
                Listening,
                Recording,
                Transcribing,
                PlayingFiller,
                RequestingResponse,
                PollingResponse,
                Speaking,
                Listening
            ]
        );
    }

    #[test]
    fn test_welcome_goes_through_speaking() {
        let mut sm = ConversationStateMachine::new();
        let result = sm.process_event(SessionEvent::WelcomeReceived).unwrap();
        assert_eq!(result.new_state, ConversationState::Speaking);
        let result = sm.process_event(SessionEvent::PlaybackFinished).unwrap();
        assert_eq!(result.new_state, ConversationState::Listening);
    }

    #[test]
    fn test_blocking_mode_skips_polling() {
        let sm = machine_in(vec![
            SessionEvent::SessionStarted,
            SessionEvent::SpeechOnset,
            SessionEvent::SegmentCaptured,
            SessionEvent::TranscriptReceived {
                text: "hi".to_string(),
            },
            SessionEvent::FillerSkipped,
            SessionEvent::ResponseReady,
        ]);
        assert_eq!(sm.state(), ConversationState::Speaking);
        assert!(!sm.history().contains(&ConversationState::PollingResponse));
    }

    #[test]
    fn test_transcript_carried_as_data() {
        let mut sm = machine_in(vec![
            SessionEvent::SessionStarted,
            SessionEvent::SpeechOnset,
            SessionEvent::SegmentCaptured,
        ]);
        let result = sm
            .process_event(SessionEvent::TranscriptReceived {
                text: "what's the weather".to_string(),
            })
            .unwrap();
        assert!(matches!(
            result.data,
            Some(TransitionData::Transcript { ref text }) if text == "what's the weather"
        ));
    }

    #[test]
    fn test_no_speech_returns_to_listening() {
        let mut sm = machine_in(vec![SessionEvent::SessionStarted]);
        let result = sm.process_event(SessionEvent::NoSpeechDetected).unwrap();
        assert_eq!(result.new_state, ConversationState::Listening);
        assert_eq!(result.reason, TransitionReason::NoSpeech);
    }

    #[test]
    fn test_failures_return_to_listening_from_every_turn_state() {
        let paths: Vec<Vec<SessionEvent>> = vec![
            vec![SessionEvent::SessionStarted, SessionEvent::SpeechOnset],
            vec![
                SessionEvent::SessionStarted,
                SessionEvent::SpeechOnset,
                SessionEvent::SegmentCaptured,
            ],
            vec![
                SessionEvent::SessionStarted,
                SessionEvent::SpeechOnset,
                SessionEvent::SegmentCaptured,
                SessionEvent::TranscriptReceived { text: "x".into() },
                SessionEvent::FillerSkipped,
            ],
            vec![
                SessionEvent::SessionStarted,
                SessionEvent::SpeechOnset,
                SessionEvent::SegmentCaptured,
                SessionEvent::TranscriptReceived { text: "x".into() },
                SessionEvent::FillerStarted,
                SessionEvent::ResponseSubmitted,
            ],
        ];

        for path in paths {
            let mut sm = machine_in(path);
            let from = sm.state();
            let result = sm.process_event(failure()).unwrap();
            assert_eq!(result.new_state, ConversationState::Listening, "from {:?}", from);
            assert!(matches!(result.reason, TransitionReason::Error { .. }));
        }
    }

    #[test]
    fn test_pause_only_from_capture_states() {
        let mut sm = machine_in(vec![SessionEvent::SessionStarted, SessionEvent::SpeechOnset]);
        assert_eq!(
            sm.process_event(SessionEvent::Pause).unwrap().new_state,
            ConversationState::Paused
        );
        assert!(sm.process_event(SessionEvent::Pause).is_none());
        assert!(sm.process_event(SessionEvent::SpeakRequested).is_none());
        assert_eq!(
            sm.process_event(SessionEvent::Resume).unwrap().new_state,
            ConversationState::Listening
        );

        let mut sm = machine_in(vec![
            SessionEvent::SessionStarted,
            SessionEvent::SpeechOnset,
            SessionEvent::SegmentCaptured,
        ]);
        assert!(sm.process_event(SessionEvent::Pause).is_none());
        assert_eq!(sm.state(), ConversationState::Transcribing);
    }

    #[test]
    fn test_speak_request_preempts_recording() {
        let mut sm = machine_in(vec![SessionEvent::SessionStarted, SessionEvent::SpeechOnset]);
        let result = sm.process_event(SessionEvent::SpeakRequested).unwrap();
        assert_eq!(result.previous_state, ConversationState::Recording);
        assert_eq!(result.new_state, ConversationState::Speaking);
        assert!(!sm.state().is_capturing_audio());
    }

    #[test]
    fn test_speaking_cannot_be_reentered() {
        let mut sm = machine_in(vec![SessionEvent::WelcomeReceived]);
        assert!(sm.process_event(SessionEvent::SpeakRequested).is_none());
        assert!(sm.process_event(SessionEvent::SpeechOnset).is_none());
    }

    #[test]
    fn test_exit_phrase_ends_session() {
        let mut sm = machine_in(vec![
            SessionEvent::SessionStarted,
            SessionEvent::SpeechOnset,
            SessionEvent::SegmentCaptured,
        ]);
        let result = sm
            .process_event(SessionEvent::ExitPhraseHeard {
                text: "goodbye".into(),
            })
            .unwrap();
        assert_eq!(result.new_state, ConversationState::Ended);
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn test_ended_is_absorbing() {
        let mut sm = machine_in(vec![SessionEvent::SessionStarted, SessionEvent::End]);
        assert!(sm.process_event(SessionEvent::End).is_none());
        assert!(sm.process_event(SessionEvent::Resume).is_none());
        assert_eq!(sm.state(), ConversationState::Ended);
    }

    #[test]
    fn test_subscribers_see_latest_state() {
        let mut sm = ConversationStateMachine::new();
        let rx = sm.subscribe();
        sm.process_event(SessionEvent::SessionStarted);
        sm.process_event(SessionEvent::SpeechOnset);
        assert_eq!(*rx.borrow(), ConversationState::Recording);
    }

    #[test]
    fn test_capture_and_playback_states_are_disjoint() {
        use ConversationState::*;
        for state in [
            Idle,
            Listening,
            Recording,
            Transcribing,
            PlayingFiller,
            RequestingResponse,
            PollingResponse,
            Speaking,
            Paused,
            Ended,
        ] {
            assert!(!(state.is_capturing_audio() && state.may_play_audio()));
        }
    }
}
