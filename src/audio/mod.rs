//! Audio subsystem for Colloquy
//!
//! Microphone capture and voice activity detection on the input side;
//! decoding, staging and playback of backend audio on the output side.

pub mod capture;
pub mod decode;
pub mod device;
pub mod format;
pub mod playback;
pub mod ring_buffer;
pub mod staging;
pub mod vad;
pub mod wav;

pub use capture::{AudioInput, InputStream, MicrophoneInput};
pub use decode::{AudioFormat, DecodeReport, DecodeStrategy, DecodedClip, Decoder};
pub use device::{list_input_devices, InputDeviceInfo};
pub use format::AudioConverter;
pub use playback::{AudioOutput, AudioPipeline, LipSync, PlayOutcome, PlaybackTask, SpeakerOutput};
pub use ring_buffer::AudioRingBuffer;
pub use staging::{StagedFile, StagingArea};
pub use vad::{
    CaptureMode, ListenOutcome, SpeechSegment, StopReason, VadConfig, VadEvent,
    VoiceActivityDetector,
};
pub use wav::{encode_wav, parse_wav_manually};
