//! cpal-backed implementation of the device abstraction.
//!
//! cpal streams are not `Send`, so each stream lives on a dedicated
//! thread that parks until its stop channel closes. The handles returned
//! to the controller only carry the stop sender and the shared state the
//! audio callbacks read, which keeps them `Send` and droppable from the
//! session task.

use super::{AudioBackend, CaptureHandle, OutputDevice, ScheduledHandle};
use crate::audio::{self, AudioFrame};
use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use tokio::sync::mpsc;

const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Production backend using the host's default cpal devices.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Holding the sender keeps the stream thread alive; dropping it unparks
/// the thread, which drops the stream and releases the device.
struct StopGuard(#[allow(dead_code)] std_mpsc::Sender<()>);

struct CpalCapture {
    rate: u32,
    _stop: StopGuard,
}

impl CaptureHandle for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.rate
    }
}

struct Segment {
    start: u64,
    samples: Vec<f32>,
    stopped: Arc<AtomicBool>,
}

struct OutputShared {
    /// Samples played since the stream started; the device clock.
    clock: AtomicU64,
    segments: Mutex<Vec<Segment>>,
}

struct SegmentHandle {
    stopped: Arc<AtomicBool>,
}

impl ScheduledHandle for SegmentHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

struct CpalOutput {
    shared: Arc<OutputShared>,
    device_rate: u32,
    source_rate: u32,
    _stop: StopGuard,
}

impl OutputDevice for CpalOutput {
    fn now(&self) -> f64 {
        self.shared.clock.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.source_rate
    }

    fn schedule(&mut self, pcm: Vec<f32>, start: f64) -> Box<dyn ScheduledHandle> {
        let pcm = if self.source_rate == self.device_rate {
            pcm
        } else {
            audio::resample(&pcm, self.source_rate, self.device_rate)
        };
        let start_sample = (start.max(0.0) * self.device_rate as f64).round() as u64;
        let stopped = Arc::new(AtomicBool::new(false));
        self.shared.segments.lock().unwrap().push(Segment {
            start: start_sample,
            samples: pcm,
            stopped: stopped.clone(),
        });
        Box::new(SegmentHandle { stopped })
    }
}

fn map_capture_error(message: String) -> VoiceError {
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("access denied") {
        VoiceError::PermissionDenied(message)
    } else {
        VoiceError::DeviceInit(message)
    }
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    block_size: usize,
    tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut pending: Vec<f32> = Vec::with_capacity(block_size);
    let mut sequence: u64 = 0;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mut acc = 0.0f32;
                for sample in frame {
                    acc += f32::from_sample(*sample);
                }
                pending.push(acc / channels as f32);
                if pending.len() == block_size {
                    let samples = std::mem::replace(&mut pending, Vec::with_capacity(block_size));
                    let frame = AudioFrame { samples, sequence };
                    sequence += 1;
                    // The callback must never block; a full channel means
                    // the uplink is behind and the frame is dropped.
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                        tracing::debug!("capture frame dropped: uplink channel full");
                    }
                }
            }
        },
        |err| tracing::error!(error = %err, "capture stream error"),
        None,
    )
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<OutputShared>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            let clock = shared.clock.load(Ordering::Acquire);
            let mut segments = shared.segments.lock().unwrap();
            for i in 0..frames {
                let t = clock + i as u64;
                let mut acc = 0.0f32;
                for segment in segments.iter() {
                    if segment.stopped.load(Ordering::Relaxed) || t < segment.start {
                        continue;
                    }
                    let offset = (t - segment.start) as usize;
                    if offset < segment.samples.len() {
                        acc += segment.samples[offset];
                    }
                }
                let value = T::from_sample(acc.clamp(-1.0, 1.0));
                for c in 0..channels {
                    data[i * channels + c] = value;
                }
            }
            let new_clock = clock + frames as u64;
            segments.retain(|segment| {
                !segment.stopped.load(Ordering::Relaxed)
                    && segment.start + segment.samples.len() as u64 > new_clock
            });
            shared.clock.store(new_clock, Ordering::Release);
        },
        |err| tracing::error!(error = %err, "output stream error"),
        None,
    )
}

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        block_size: usize,
    ) -> Result<(Box<dyn CaptureHandle>, mpsc::Receiver<AudioFrame>), VoiceError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, VoiceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        std::thread::Builder::new()
            .name("artea-voice-capture".into())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_input_device() else {
                    let _ = ready_tx.send(Err(VoiceError::DeviceInit(
                        "no capture device available".into(),
                    )));
                    return;
                };
                let supported = match device.default_input_config() {
                    Ok(supported) => supported,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_capture_error(e.to_string())));
                        return;
                    }
                };
                let sample_format = supported.sample_format();
                let config: cpal::StreamConfig = supported.into();
                let rate = config.sample_rate.0;
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_capture_stream::<f32>(&device, &config, block_size, frame_tx)
                    }
                    cpal::SampleFormat::I16 => {
                        build_capture_stream::<i16>(&device, &config, block_size, frame_tx)
                    }
                    cpal::SampleFormat::U16 => {
                        build_capture_stream::<u16>(&device, &config, block_size, frame_tx)
                    }
                    other => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceInit(format!(
                            "unsupported capture sample format {other:?}"
                        ))));
                        return;
                    }
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_capture_error(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::DeviceInit(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceInit(e.to_string()))?;

        let rate = ready_rx
            .recv()
            .map_err(|_| VoiceError::DeviceInit("capture thread exited during setup".into()))??;
        tracing::info!(rate, block_size, "capture device opened");
        Ok((
            Box::new(CpalCapture {
                rate,
                _stop: StopGuard(stop_tx),
            }),
            frame_rx,
        ))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, VoiceError> {
        let shared = Arc::new(OutputShared {
            clock: AtomicU64::new(0),
            segments: Mutex::new(Vec::new()),
        });
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, VoiceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_shared = shared.clone();
        std::thread::Builder::new()
            .name("artea-voice-output".into())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_output_device() else {
                    let _ = ready_tx.send(Err(VoiceError::DeviceInit(
                        "no output device available".into(),
                    )));
                    return;
                };
                let supported = match device.default_output_config() {
                    Ok(supported) => supported,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceInit(e.to_string())));
                        return;
                    }
                };
                let sample_format = supported.sample_format();
                let config: cpal::StreamConfig = supported.into();
                let rate = config.sample_rate.0;
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_output_stream::<f32>(&device, &config, thread_shared)
                    }
                    cpal::SampleFormat::I16 => {
                        build_output_stream::<i16>(&device, &config, thread_shared)
                    }
                    cpal::SampleFormat::U16 => {
                        build_output_stream::<u16>(&device, &config, thread_shared)
                    }
                    other => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceInit(format!(
                            "unsupported output sample format {other:?}"
                        ))));
                        return;
                    }
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::DeviceInit(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::DeviceInit(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceInit(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| VoiceError::DeviceInit("output thread exited during setup".into()))??;
        tracing::info!(device_rate, source_rate = sample_rate, "output device opened");
        Ok(Box::new(CpalOutput {
            shared,
            device_rate,
            source_rate: sample_rate,
            _stop: StopGuard(stop_tx),
        }))
    }
}
