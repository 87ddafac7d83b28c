use crate::error::SessionError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const SILENCE_THRESHOLD: f32 = 0.02;
pub const SILENCE_DELAY: Duration = Duration::from_millis(1200);
/// Roughly one display frame.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceConfig {
    /// Normalized amplitude above which the candidate counts as speaking.
    pub threshold: f32,
    /// How long the amplitude must stay at or below `threshold`.
    pub delay: Duration,
    pub frame_interval: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: SILENCE_THRESHOLD,
            delay: SILENCE_DELAY,
            frame_interval: FRAME_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SilenceEvent {
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceActivity {
    /// Sent on every frame above threshold. Consumers must be idempotent.
    Speaking,
    Silence(SilenceEvent),
}

/// One recording session's audio graph, sampled like a browser AnalyserNode.
pub trait AmplitudeSource: Send {
    fn bin_count(&self) -> usize;
    /// Fills `bins` with byte-scaled magnitudes (0..=255).
    fn read_frequency_data(&mut self, bins: &mut [u8]);
    /// Stops capture and frees the device. Called exactly once, and may block.
    fn release(&mut self);
}

/// Mean bin magnitude scaled to `[0, 1]`.
pub fn normalized_amplitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| u64::from(b)).sum();
    sum as f32 / bins.len() as f32 / 255.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DebounceState {
    Idle,
    Armed { deadline: Instant },
    /// Fired for the current quiet stretch. Only speech re-enables it.
    Spent,
}

/// Edge-triggered silence debounce. Owns the only timer deadline.
#[derive(Debug)]
pub struct SilenceDebouncer {
    threshold: f32,
    delay: Duration,
    state: DebounceState,
}

impl SilenceDebouncer {
    pub fn new(config: &SilenceConfig) -> Self {
        Self {
            threshold: config.threshold,
            delay: config.delay,
            state: DebounceState::Idle,
        }
    }

    /// Feeds one amplitude sample. Returns `Speaking` when above threshold.
    pub fn observe(&mut self, amplitude: f32, now: Instant) -> Option<VoiceActivity> {
        if amplitude > self.threshold {
            self.state = DebounceState::Idle;
            return Some(VoiceActivity::Speaking);
        }
        if self.state == DebounceState::Idle {
            self.state = DebounceState::Armed {
                deadline: now + self.delay,
            };
        }
        None
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Consumes an armed timer whose deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<SilenceEvent> {
        match self.state {
            DebounceState::Armed { deadline } if now >= deadline => {
                self.state = DebounceState::Spent;
                Some(SilenceEvent {
                    duration_ms: self.delay.as_millis() as u64,
                    timestamp: Utc::now(),
                })
            }
            _ => None,
        }
    }
}

struct Recording {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Samples an [`AmplitudeSource`] on a fixed tick and reports speaking and
/// debounced silence over a channel.
pub struct SilenceDetector {
    config: SilenceConfig,
    recording: Option<Recording>,
    amplitude: Arc<AtomicU32>,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig) -> Self {
        Self {
            config,
            recording: None,
            amplitude: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Takes ownership of `source` until [`stop_recording`](Self::stop_recording).
    pub fn start_recording(
        &mut self,
        mut source: Box<dyn AmplitudeSource>,
        events: mpsc::UnboundedSender<VoiceActivity>,
    ) -> Result<(), SessionError> {
        if self.is_recording() {
            source.release();
            return Err(SessionError::AlreadyRecording);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(monitor(
            source,
            self.config,
            self.amplitude.clone(),
            events,
            stop_rx,
        ));
        self.recording = Some(Recording { stop_tx, task });
        tracing::info!("Recording started");
        Ok(())
    }

    /// Stops sampling and waits until the audio source has been released.
    pub async fn stop_recording(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        // The monitor may already have exited on its own.
        let _ = recording.stop_tx.send(());
        if let Err(e) = recording.task.await {
            tracing::error!("Silence monitor task failed: {:?}", e);
        }
        self.amplitude.store(0, Ordering::Relaxed);
        tracing::info!("Recording stopped");
    }

    pub fn is_recording(&self) -> bool {
        self.recording
            .as_ref()
            .is_some_and(|recording| !recording.task.is_finished())
    }

    /// Latest normalized amplitude, for level meters.
    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.amplitude.load(Ordering::Relaxed))
    }
}

async fn monitor(
    mut source: Box<dyn AmplitudeSource>,
    config: SilenceConfig,
    level: Arc<AtomicU32>,
    events: mpsc::UnboundedSender<VoiceActivity>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut debouncer = SilenceDebouncer::new(&config);
    let mut bins = vec![0u8; source.bin_count()];
    let mut ticker = tokio::time::interval(config.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let deadline = debouncer.deadline();
        let activity = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => debouncer.fire(Instant::now()).map(VoiceActivity::Silence),
            _ = ticker.tick() => {
                source.read_frequency_data(&mut bins);
                let amplitude = normalized_amplitude(&bins);
                level.store(amplitude.to_bits(), Ordering::Relaxed);
                debouncer.observe(amplitude, Instant::now())
            }
        };

        if let Some(activity) = activity {
            if let VoiceActivity::Silence(event) = &activity {
                tracing::debug!("Silence detected: {:?}", event);
            }
            if events.send(activity).is_err() {
                tracing::debug!("Voice activity receiver dropped, stopping monitor");
                break;
            }
        }
    }

    // Releasing may join a capture thread, so keep it off the async workers.
    if let Err(e) = tokio::task::spawn_blocking(move || source.release()).await {
        tracing::error!("Releasing the audio source failed: {:?}", e);
    }
}
