use crate::analyser::{FFT_SIZE, SpectrumAnalyser};
use crate::device::get_or_default_input;
use anyhow::{Context, anyhow};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use interview_core::AmplitudeSource;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::mpsc;
use std::thread::JoinHandle;

/// About a second of mono audio at 48kHz.
const RING_CAPACITY: usize = 48_000;

/// Live microphone input exposed as an [`AmplitudeSource`].
///
/// `cpal::Stream` is not `Send`, so a dedicated capture thread builds the
/// stream, keeps it alive and drops it when told to stop. Samples cross over
/// through a lock-free ring buffer.
pub struct MicrophoneMonitor {
    consumer: HeapCons<f32>,
    window: Vec<f32>,
    analyser: SpectrumAnalyser,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneMonitor {
    /// Opens `device_name` (or the default input) and starts capturing.
    pub fn open(device_name: Option<&str>) -> anyhow::Result<Self> {
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture(device_name, producer, ready_tx, stop_rx))
            .context("Failed to spawn capture thread")?;

        match ready_rx.recv() {
            Ok(Ok(name)) => tracing::info!("Using input device: {}", name),
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow!("Capture thread exited before the microphone was ready"));
            }
        }

        Ok(Self {
            consumer,
            window: Vec::with_capacity(FFT_SIZE * 2),
            analyser: SpectrumAnalyser::new(),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn capture(
    device_name: Option<String>,
    producer: HeapProd<f32>,
    ready: mpsc::Sender<anyhow::Result<String>>,
    stop: mpsc::Receiver<()>,
) {
    let stream = match build_stream(device_name.as_deref(), producer) {
        Ok((stream, name)) => {
            let _ = ready.send(Ok(name));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until release() or until the monitor is dropped.
    let _ = stop.recv();
    drop(stream);
    tracing::debug!("Input stream closed");
}

fn build_stream(
    device_name: Option<&str>,
    mut producer: HeapProd<f32>,
) -> anyhow::Result<(cpal::Stream, String)> {
    let input = get_or_default_input(device_name).context("Failed to get audio input device")?;
    let name = input.name()?;
    let input_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let channel_count = input_config.channels() as usize;
    let stream_config: StreamConfig = input_config.into();
    tracing::info!("Input stream config: {:?}", &stream_config);

    // Downmix to mono and hand over to the analyser side.
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = if channel_count > 1 {
            data.chunks(channel_count)
                .map(|c| c.iter().sum::<f32>() / channel_count as f32)
                .collect()
        } else {
            data.to_vec()
        };
        let pushed = producer.push_slice(&mono);
        if pushed < mono.len() {
            tracing::trace!("Ring buffer full, dropped {} samples", mono.len() - pushed);
        }
    };

    let stream = input.build_input_stream(
        &stream_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    stream.play()?;
    Ok((stream, name))
}

impl AmplitudeSource for MicrophoneMonitor {
    fn bin_count(&self) -> usize {
        self.analyser.bin_count()
    }

    fn read_frequency_data(&mut self, bins: &mut [u8]) {
        let mut chunk = [0.0f32; FFT_SIZE];
        loop {
            let n = self.consumer.pop_slice(&mut chunk);
            if n == 0 {
                break;
            }
            self.window.extend_from_slice(&chunk[..n]);
        }
        let excess = self.window.len().saturating_sub(FFT_SIZE);
        self.window.drain(..excess);

        if let Err(e) = self.analyser.byte_frequency_data(&self.window, bins) {
            tracing::warn!("Spectrum analysis failed: {:?}", e);
            bins.fill(0);
        }
    }

    fn release(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
            tracing::info!("Microphone released");
        }
    }
}

impl Drop for MicrophoneMonitor {
    fn drop(&mut self) {
        self.release();
    }
}
