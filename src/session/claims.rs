//! Exclusive claims on the microphone and the speaker
//!
//! A claim is refused while the other device, or the same device, is held.
//! Releasing happens in `Drop`, so every exit path clears its flag.

use crate::error::{VoiceError, VoiceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Microphone,
    Speaker,
}

/// Shared claim flags for the two audio devices
#[derive(Debug, Clone, Default)]
pub struct DeviceClaims {
    microphone: Arc<AtomicBool>,
    speaker: Arc<AtomicBool>,
}

impl DeviceClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.microphone.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.speaker.load(Ordering::SeqCst)
    }

    pub fn claim_microphone(&self) -> VoiceResult<DeviceClaim> {
        self.claim(Device::Microphone)
    }

    pub fn claim_speaker(&self) -> VoiceResult<DeviceClaim> {
        self.claim(Device::Speaker)
    }

    fn claim(&self, device: Device) -> VoiceResult<DeviceClaim> {
        let (own, other) = match device {
            Device::Microphone => (&self.microphone, &self.speaker),
            Device::Speaker => (&self.speaker, &self.microphone),
        };

        if other.load(Ordering::SeqCst) {
            return Err(VoiceError::StateConflict(format!(
                "{:?} requested while the other device is active",
                device
            )));
        }
        if own
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VoiceError::StateConflict(format!(
                "{:?} is already claimed",
                device
            )));
        }

        tracing::debug!("{:?} claimed", device);
        Ok(DeviceClaim {
            flag: own.clone(),
            device,
        })
    }
}

/// A held device; released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    flag: Arc<AtomicBool>,
    device: Device,
}

impl DeviceClaim {
    pub fn device(&self) -> Device {
        self.device
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        tracing::debug!("{:?} released", self.device);
    }
}
