//! Capture and output device abstraction.
//!
//! The controller owns device handles for the lifetime of a session; no
//! other component holds a reference outside calls made through the
//! uplink and the playback scheduler. Dropping a handle releases the
//! underlying stream, so every acquisition is matched by exactly one
//! release regardless of which exit path runs.

pub mod cpal;

pub use self::cpal::CpalBackend;

use crate::audio::AudioFrame;
use crate::error::VoiceError;
use tokio::sync::mpsc;

/// A live microphone stream. Frames arrive on the channel returned by
/// [`AudioBackend::open_capture`]; dropping the handle stops the stream.
pub trait CaptureHandle: Send {
    /// Native sample rate of the capture device (Hz).
    fn sample_rate(&self) -> u32;
}

/// A chunk of audio scheduled on the output device. `stop` silences the
/// remainder; finished chunks stop themselves.
pub trait ScheduledHandle: Send {
    fn stop(&mut self);
}

/// An open output device with a monotonic sample clock.
pub trait OutputDevice: Send {
    /// Current position of the device clock, in seconds.
    fn now(&self) -> f64;
    /// Sample rate the caller's PCM buffers are expressed in (Hz).
    fn sample_rate(&self) -> u32;
    /// Schedules mono PCM for playback starting at `start` seconds on the
    /// device clock.
    fn schedule(&mut self, pcm: Vec<f32>, start: f64) -> Box<dyn ScheduledHandle>;
}

/// Acquires capture and output devices for a session attempt.
pub trait AudioBackend: Send + Sync {
    /// Requests the microphone and starts delivering fixed-size mono
    /// frames of `block_size` samples at the device's native rate.
    fn open_capture(
        &self,
        block_size: usize,
    ) -> Result<(Box<dyn CaptureHandle>, mpsc::Receiver<AudioFrame>), VoiceError>;

    /// Opens the output device. `sample_rate` is the rate of the PCM the
    /// caller will schedule; the backend converts if the hardware runs at
    /// a different rate.
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, VoiceError>;
}
