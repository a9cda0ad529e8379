//! Audio device seams.
//!
//! Capture and playback loops talk to these traits rather than to cpal
//! directly, so they can run against in-memory devices in tests.

use crate::error::{Error, Result};
use crate::types::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use speechlink_utils::stream::{Microphone, Speaker};

/// An open microphone producing PCM16 mono.
pub trait AudioSource {
    /// Fills `buf` and returns the byte count. Must return within a bounded
    /// time even when the device is silent, possibly with zero bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// An open speaker consuming PCM16 mono.
pub trait AudioSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Waits for written audio to finish playing.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens microphones. The returned source is used only on the thread that opened it.
pub trait InputDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioSource>>;
}

/// Opens speakers. The returned sink is used only on the thread that opened it.
pub trait OutputDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioSink>>;
}

/// The system microphone at the capture rate.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    /// `None` selects the host's default input.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl InputDevice for CpalInput {
    fn open(&self) -> Result<Box<dyn AudioSource>> {
        let microphone =
            Microphone::open(self.device_name.clone(), CAPTURE_SAMPLE_RATE).map_err(Error::device)?;
        Ok(Box::new(microphone))
    }
}

impl AudioSource for Microphone {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Microphone::read(self, buf).map_err(Error::device)
    }
}

/// The system speaker at the playback rate.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// `None` selects the host's default output.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl OutputDevice for CpalOutput {
    fn open(&self) -> Result<Box<dyn AudioSink>> {
        let speaker =
            Speaker::open(self.device_name.clone(), PLAYBACK_SAMPLE_RATE).map_err(Error::device)?;
        Ok(Box::new(speaker))
    }
}

impl AudioSink for Speaker {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        Speaker::write(self, pcm).map_err(Error::device)
    }

    fn drain(&mut self) -> Result<()> {
        Speaker::drain(self).map_err(Error::device)
    }
}

/// Lists the host's input devices, one per line.
pub fn list_inputs() -> Result<String> {
    speechlink_utils::device::get_available_inputs().map_err(Error::device)
}

/// Lists the host's output devices, one per line.
pub fn list_outputs() -> Result<String> {
    speechlink_utils::device::get_available_outputs().map_err(Error::device)
}
