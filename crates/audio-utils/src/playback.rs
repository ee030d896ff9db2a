//! Gapless playback scheduling for streamed PCM fragments.
//!
//! Fragments arrive with network jitter but must render back-to-back. The
//! scheduler keeps a single `next_start_time` cursor on a rendering clock: each
//! fragment starts where the previous one ends, unless the queue has drained,
//! in which case the cursor snaps forward to "now" instead of scheduling into
//! the past.

use crate::audio::{OUTPUT_SAMPLE_RATE, pcm16_to_f32};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A monotonic clock, in seconds, that audio is rendered against.
pub trait RenderClock {
    fn now(&self) -> f64;
}

/// Wall-clock time elapsed since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The wall-clock instant corresponding to a render time.
    pub fn instant_at(&self, seconds: f64) -> Instant {
        self.origin + Duration::from_secs_f64(seconds.max(0.0))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(seconds: f64) -> Self {
        let clock = Self::default();
        clock.set(seconds);
        clock
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl RenderClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::SeqCst))
    }
}

/// Sample layout of every fragment a scheduler receives. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Mono PCM16 at the upstream output rate.
    pub fn upstream_output() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Playback duration, in seconds, of `samples` interleaved samples.
    pub fn duration_of(&self, samples: usize) -> f64 {
        let frames = samples / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// A fragment placed on the rendering timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFragment {
    /// Arrival order, starting at zero.
    pub seq: u64,
    /// Render time at which playback begins.
    pub start: f64,
    /// Render time at which playback ends (exclusive).
    pub end: f64,
    pub samples: Vec<f32>,
}

impl ScheduledFragment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

pub struct PlaybackScheduler<C: RenderClock> {
    clock: C,
    format: AudioFormat,
    next_start_time: f64,
    next_seq: u64,
}

impl<C: RenderClock> PlaybackScheduler<C> {
    pub fn new(clock: C, format: AudioFormat) -> Self {
        Self {
            clock,
            format,
            next_start_time: 0.0,
            next_seq: 0,
        }
    }

    /// End time of the last scheduled fragment.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Seconds of audio scheduled but not yet rendered.
    pub fn backlog(&self) -> f64 {
        (self.next_start_time - self.clock.now()).max(0.0)
    }

    /// Decodes a PCM16 fragment and schedules it.
    pub fn enqueue_pcm16(&mut self, bytes: &[u8]) -> Option<ScheduledFragment> {
        self.schedule(pcm16_to_f32(bytes))
    }

    /// Places decoded samples directly after everything already scheduled.
    ///
    /// Returns `None` for an empty fragment, which leaves the cursor untouched.
    pub fn schedule(&mut self, samples: Vec<f32>) -> Option<ScheduledFragment> {
        if samples.is_empty() {
            tracing::debug!("Skipping empty audio fragment");
            return None;
        }

        let now = self.clock.now();
        if self.next_start_time < now {
            // Queue drained; never schedule into the past.
            self.next_start_time = now;
        }

        let start = self.next_start_time;
        let duration = self.format.duration_of(samples.len());
        self.next_start_time += duration;

        let seq = self.next_seq;
        self.next_seq += 1;

        tracing::trace!(
            "Scheduled fragment {} at {:.3}s for {:.3}s",
            seq,
            start,
            duration
        );
        Some(ScheduledFragment {
            seq,
            start,
            end: start + duration,
            samples,
        })
    }

    /// Called when a fragment finishes rendering.
    ///
    /// Pulls the cursor up to "now" if it fell behind, without touching any
    /// backlog that is still queued ahead of the clock.
    pub fn fragment_ended(&mut self, seq: u64) {
        let now = self.clock.now();
        if self.next_start_time < now {
            tracing::trace!(
                "Fragment {} ended with drained queue, resetting cursor to {:.3}s",
                seq,
                now
            );
            self.next_start_time = now;
        }
    }
}

/// Inputs to the task that owns a scheduler.
#[derive(Debug)]
pub enum PlaybackInput {
    /// A PCM16 fragment arrived.
    Fragment(Vec<u8>),
    /// The fragment with this sequence number finished rendering.
    Ended(u64),
}

/// Sends arrivals and completions to a running playback task.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackInput>,
}

impl PlaybackHandle {
    pub fn enqueue(&self, pcm16: Vec<u8>) -> anyhow::Result<()> {
        self.tx
            .send(PlaybackInput::Fragment(pcm16))
            .map_err(|_| anyhow::anyhow!("playback task has stopped"))
    }

    pub fn fragment_ended(&self, seq: u64) -> anyhow::Result<()> {
        self.tx
            .send(PlaybackInput::Ended(seq))
            .map_err(|_| anyhow::anyhow!("playback task has stopped"))
    }
}

/// Moves a scheduler into its own task.
///
/// Arrivals and completion callbacks share one channel, so the scheduler's
/// cursor only ever has a single writer. Scheduled fragments are emitted on
/// the returned receiver in arrival order. The task ends, handing back the
/// scheduler, once every handle has been dropped.
pub fn spawn_playback<C>(
    mut scheduler: PlaybackScheduler<C>,
) -> (
    PlaybackHandle,
    mpsc::UnboundedReceiver<ScheduledFragment>,
    JoinHandle<PlaybackScheduler<C>>,
)
where
    C: RenderClock + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        while let Some(input) = rx.recv().await {
            match input {
                PlaybackInput::Fragment(pcm16) => {
                    if let Some(fragment) = scheduler.enqueue_pcm16(&pcm16) {
                        if out_tx.send(fragment).is_err() {
                            tracing::warn!("Scheduled fragment receiver dropped");
                        }
                    }
                }
                PlaybackInput::Ended(seq) => scheduler.fragment_ended(seq),
            }
        }
        tracing::debug!("Playback task finished");
        scheduler
    });

    (PlaybackHandle { tx }, out_rx, handle)
}
