//! Microphone uplink: capture frames -> volume signal -> resample ->
//! encode -> outbound channel.
//!
//! The actual network send happens in the session loop, so the uplink
//! never blocks on I/O and a `stop()` racing an in-flight frame simply
//! makes that frame the last one forwarded.

use crate::audio::{self, AudioFrame};
use crate::transport::EncodedFrame;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type VolumeSignal = Arc<dyn Fn(f32) + Send + Sync>;

/// A running uplink task. Dropping it detaches the task; prefer
/// [`AudioUplink::stop`] so shutdown is observed.
pub struct AudioUplink {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AudioUplink {
    /// Starts processing `frames` captured at `capture_rate`, forwarding
    /// encoded frames at `target_rate` into `outbound`. Emits a 0..1
    /// volume level for every frame.
    pub fn start(
        mut frames: mpsc::Receiver<AudioFrame>,
        outbound: mpsc::Sender<EncodedFrame>,
        capture_rate: u32,
        target_rate: u32,
        on_volume: VolumeSignal,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let mime_type = format!("audio/pcm;rate={target_rate}");
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    frame = frames.recv() => {
                        let Some(frame) = frame else { break };
                        on_volume(audio::volume_level(&frame.samples));
                        let resampled = audio::resample(&frame.samples, capture_rate, target_rate);
                        if resampled.is_empty() {
                            continue;
                        }
                        let encoded = EncodedFrame {
                            mime_type: mime_type.clone(),
                            data: audio::encode_base64_pcm16(&resampled),
                        };
                        if outbound.send(encoded).await.is_err() {
                            tracing::debug!(sequence = frame.sequence, "session gone, uplink stopping");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("uplink task finished");
        });
        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Signals the task to stop and waits for it to drain.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn frame(samples: Vec<f32>, sequence: u64) -> AudioFrame {
        AudioFrame { samples, sequence }
    }

    #[tokio::test]
    async fn emits_volume_and_encoded_frames() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let volumes: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = volumes.clone();
        let uplink = AudioUplink::start(
            frame_rx,
            outbound_tx,
            32_000,
            16_000,
            Arc::new(move |v| sink.lock().unwrap().push(v)),
        );

        frame_tx.send(frame(vec![0.5; 64], 0)).await.unwrap();
        let sent = outbound_rx.recv().await.expect("one encoded frame");
        assert_eq!(sent.mime_type, "audio/pcm;rate=16000");
        let decoded = crate::audio::decode_base64_pcm16(&sent.data);
        assert_eq!(decoded.len(), 32);

        assert_eq!(volumes.lock().unwrap().len(), 1);
        assert!(volumes.lock().unwrap()[0] > 0.9);
        uplink.stop().await;
    }

    #[tokio::test]
    async fn stop_races_in_flight_frames_without_panic() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
        let uplink = AudioUplink::start(
            frame_rx,
            outbound_tx,
            16_000,
            16_000,
            Arc::new(|_| {}),
        );
        for sequence in 0..4 {
            frame_tx.send(frame(vec![0.1; 16], sequence)).await.unwrap();
        }
        uplink.stop().await;
        // Whatever was in flight may have been forwarded; nothing after
        // stop is.
        let mut forwarded = 0;
        while outbound_rx.try_recv().is_ok() {
            forwarded += 1;
        }
        assert!(forwarded <= 4);
    }

    #[tokio::test]
    async fn closing_capture_channel_ends_the_task() {
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(1);
        let (outbound_tx, _outbound_rx) = mpsc::channel(1);
        let uplink = AudioUplink::start(frame_rx, outbound_tx, 16_000, 16_000, Arc::new(|_| {}));
        drop(frame_tx);
        uplink.stop().await;
    }
}
