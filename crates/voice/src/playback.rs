//! Gapless playback scheduling for inbound speech chunks.
//!
//! A small state object, not a hierarchy: the cursor tracks where the
//! next chunk may start, and the scheduler retains a stop handle per
//! scheduled chunk so barge-in can silence everything at once.

use crate::audio;
use crate::device::{OutputDevice, ScheduledHandle};
use std::time::Duration;

/// Where the next chunk may start on the device clock. `None` means the
/// stream is idle and the next chunk gets the anti-click lead.
#[derive(Debug, Default)]
struct PlaybackCursor {
    next_start: Option<f64>,
}

struct ActiveChunk {
    handle: Box<dyn ScheduledHandle>,
    ends_at: f64,
}

pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    cursor: PlaybackCursor,
    active: Vec<ActiveChunk>,
    lead: f64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputDevice>, lead: Duration) -> Self {
        Self {
            output,
            cursor: PlaybackCursor::default(),
            active: Vec::new(),
            lead: lead.as_secs_f64(),
        }
    }

    /// Decodes a base64 PCM16 chunk and schedules it to play right after
    /// whatever is already queued. Chunks that fail to decode are dropped;
    /// playback continues with the next one.
    ///
    /// Invariant: start times never decrease, never overlap the previous
    /// chunk, and never fall before the device clock.
    pub fn enqueue(&mut self, data: &str) {
        let pcm = audio::decode_base64_pcm16(data);
        if pcm.is_empty() {
            tracing::warn!("dropping undecodable playback chunk");
            return;
        }
        let duration = pcm.len() as f64 / self.output.sample_rate() as f64;
        let now = self.output.now();
        let base = self.cursor.next_start.unwrap_or(0.0).max(now);
        let start = if base <= now { now + self.lead } else { base };
        let handle = self.output.schedule(pcm, start);
        self.cursor.next_start = Some(start + duration);
        self.active.push(ActiveChunk {
            handle,
            ends_at: start + duration,
        });
        self.prune(now);
    }

    /// Stops every scheduled chunk and resets the cursor, so the next
    /// `enqueue` treats the stream as idle. Used on barge-in and on
    /// session close.
    pub fn flush(&mut self) {
        for chunk in &mut self.active {
            chunk.handle.stop();
        }
        self.active.clear();
        self.cursor.next_start = None;
    }

    /// Number of chunks still scheduled or playing.
    pub fn active_chunks(&mut self) -> usize {
        let now = self.output.now();
        self.prune(now);
        self.active.len()
    }

    fn prune(&mut self, now: f64) {
        self.active.retain(|chunk| chunk.ends_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::OutputDevice;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        clock: Mutex<f64>,
        scheduled: Mutex<Vec<(f64, f64, Arc<AtomicBool>)>>,
    }

    struct FakeOutput {
        state: Arc<FakeState>,
        rate: u32,
    }

    struct FakeHandle(Arc<AtomicBool>);

    impl ScheduledHandle for FakeHandle {
        fn stop(&mut self) {
            self.0.store(true, Ordering::Relaxed);
        }
    }

    impl OutputDevice for FakeOutput {
        fn now(&self) -> f64 {
            *self.state.clock.lock().unwrap()
        }
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn schedule(&mut self, pcm: Vec<f32>, start: f64) -> Box<dyn ScheduledHandle> {
            let stopped = Arc::new(AtomicBool::new(false));
            let duration = pcm.len() as f64 / self.rate as f64;
            self.state
                .scheduled
                .lock()
                .unwrap()
                .push((start, duration, stopped.clone()));
            Box::new(FakeHandle(stopped))
        }
    }

    fn scheduler_with_state() -> (PlaybackScheduler, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        let output = FakeOutput {
            state: state.clone(),
            rate: 24_000,
        };
        (
            PlaybackScheduler::new(Box::new(output), Duration::from_millis(50)),
            state,
        )
    }

    // 500 ms of audio at 24 kHz.
    fn chunk_500ms() -> String {
        audio::encode_base64_pcm16(&vec![0.1f32; 12_000])
    }

    #[test]
    fn consecutive_chunks_are_gapless_and_ordered() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(&chunk_500ms());
        scheduler.enqueue(&chunk_500ms());
        scheduler.enqueue(&chunk_500ms());

        let scheduled = state.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 3);
        let (s1, d1, _) = scheduled[0].clone();
        let (s2, d2, _) = scheduled[1].clone();
        let (s3, _, _) = scheduled[2].clone();
        assert!(s1 >= 0.0);
        assert!(s2 >= s1 + d1 - 1e-9);
        assert!(s3 >= s2 + d2 - 1e-9);
    }

    #[test]
    fn first_chunk_after_idle_gets_the_lead() {
        let (mut scheduler, state) = scheduler_with_state();
        *state.clock.lock().unwrap() = 10.0;
        scheduler.enqueue(&chunk_500ms());
        let scheduled = state.scheduled.lock().unwrap();
        assert!((scheduled[0].0 - 10.05).abs() < 1e-9);
    }

    #[test]
    fn flush_stops_everything_and_resets_the_cursor() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(&chunk_500ms());
        scheduler.enqueue(&chunk_500ms());
        scheduler.flush();
        assert_eq!(scheduler.active_chunks(), 0);
        {
            let scheduled = state.scheduled.lock().unwrap();
            assert!(scheduled.iter().all(|(_, _, stopped)| stopped.load(Ordering::Relaxed)));
        }

        // The next chunk schedules near the current clock, not at the
        // stale cursor.
        *state.clock.lock().unwrap() = 2.0;
        scheduler.enqueue(&chunk_500ms());
        let scheduled = state.scheduled.lock().unwrap();
        let (start, _, _) = scheduled.last().unwrap().clone();
        assert!((start - 2.05).abs() < 1e-9);
    }

    #[test]
    fn never_schedules_in_the_past() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(&chunk_500ms());
        // Clock overtakes the cursor while the service stalls.
        *state.clock.lock().unwrap() = 5.0;
        scheduler.enqueue(&chunk_500ms());
        let scheduled = state.scheduled.lock().unwrap();
        assert!(scheduled[1].0 >= 5.0);
    }

    #[test]
    fn undecodable_chunks_are_dropped_without_breaking_the_stream() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue("!!! not base64 !!!");
        assert!(state.scheduled.lock().unwrap().is_empty());
        scheduler.enqueue(&chunk_500ms());
        assert_eq!(state.scheduled.lock().unwrap().len(), 1);
    }

    #[test]
    fn finished_chunks_are_pruned() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(&chunk_500ms());
        assert_eq!(scheduler.active_chunks(), 1);
        *state.clock.lock().unwrap() = 60.0;
        assert_eq!(scheduler.active_chunks(), 0);
    }
}
