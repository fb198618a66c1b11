//! Conversation backend access
//!
//! The backend exposes session, transcription, filler, response and audio
//! endpoints. Responses are produced asynchronously and collected by the
//! bounded poller.

pub mod client;
pub mod poller;
pub mod types;

pub use client::{ConversationBackend, HttpBackend};
pub use poller::{PollRequest, PollStatus, ResponsePoller};
pub use types::{AudioAsset, PollReply, SessionGreeting, SubmitAck, WordTiming};
