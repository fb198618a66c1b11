//! Conversation session: state machine, device claims and the run loop

pub mod claims;
pub mod orchestrator;
pub mod state;

pub use claims::{DeviceClaim, DeviceClaims};
pub use orchestrator::{
    ConversationSession, Orchestrator, OrchestratorCommand, OrchestratorHandle, Speaker,
    TranscriptEntry,
};
pub use state::{ConversationState, ConversationStateMachine, SessionEvent, TransitionReason};
