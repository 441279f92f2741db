//! PulseAudio-backed media devices.
//!
//! Both directions use the blocking simple API on dedicated OS threads; audio
//! crosses into tokio through channels. Samples are S16LE mono.

use super::{AudioError, AudioOutput, CaptureSpec, MediaDevices, Microphone, Result};

use async_trait::async_trait;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, error, info, warn};

fn spec(rate: u32) -> Spec {
    Spec {
        format: Format::S16le,
        channels: 1,
        rate,
    }
}

fn open_simple(app_name: &str, direction: Direction, description: &str, rate: u32) -> Result<Simple> {
    Simple::new(
        None,     // default server
        app_name, // application name
        direction,
        None, // default device
        description,
        &spec(rate),
        None, // default channel map
        None, // default buffering
    )
    .map_err(|e| AudioError::Device(e.to_string()))
}

/// Default PulseAudio source and sink
#[derive(Debug, Clone)]
pub struct PulseDevices {
    app_name: String,
}

impl PulseDevices {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

#[async_trait]
impl MediaDevices for PulseDevices {
    async fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(PulseOutput::open(&self.app_name, sample_rate).await?))
    }

    async fn open_microphone(&self, spec: CaptureSpec) -> Result<Box<dyn Microphone>> {
        if spec.channels != 1 {
            return Err(AudioError::Device(format!(
                "unsupported channel count {}",
                spec.channels
            )));
        }
        Ok(Box::new(PulseMicrophone::open(&self.app_name, spec).await?))
    }
}

pub struct PulseMicrophone {
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PulseMicrophone {
    async fn open(app_name: &str, spec: CaptureSpec) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Vec<f32>>(32);
        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let app_name = app_name.to_string();

        // Real OS thread, the simple API blocks on every read
        let handle = std::thread::spawn(move || {
            let simple = match open_simple(&app_name, Direction::Record, "record", spec.sample_rate) {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let mut buffer = vec![0i16; spec.frame_size];
            while !shutdown_clone.load(Ordering::Relaxed) {
                if let Err(e) = simple.read(bytemuck::cast_slice_mut(&mut buffer)) {
                    error!("Audio read error: {}", e);
                    break;
                }
                let frame: Vec<f32> = buffer
                    .iter()
                    .map(|&s| i16::from_le(s) as f32 / 32768.0)
                    .collect();
                if tx.blocking_send(frame).is_err() {
                    break;
                }
            }
            debug!("Capture thread exiting");
        });

        ready_rx
            .await
            .map_err(|_| AudioError::Device("capture thread died".to_string()))??;
        info!("Microphone open ({} Hz, {} sample frames)", spec.sample_rate, spec.frame_size);

        Ok(Self {
            frames: Some(rx),
            shutdown,
            handle: Some(handle),
        })
    }
}

#[async_trait]
impl Microphone for PulseMicrophone {
    fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.frames.take()
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn close(&mut self) -> Result<()> {
        self.stop();
        if let Some(handle) = self.handle.take() {
            // At most one frame read away from noticing the flag
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| AudioError::Device(e.to_string()))?
                .map_err(|_| AudioError::Device("capture thread panicked".to_string()))?;
        }
        Ok(())
    }
}

struct PlayCommand {
    samples: Vec<i16>,
    start: f64,
}

pub struct PulseOutput {
    epoch: Instant,
    sample_rate: u32,
    commands: Option<std_mpsc::Sender<PlayCommand>>,
    ended_tx: mpsc::UnboundedSender<f64>,
    ended_rx: Option<mpsc::UnboundedReceiver<f64>>,
    timers: Vec<TaskHandle<()>>,
    closed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PulseOutput {
    async fn open(app_name: &str, sample_rate: u32) -> Result<Self> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<PlayCommand>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_clone = closed.clone();
        let app_name = app_name.to_string();
        let epoch = Instant::now();

        let handle = std::thread::spawn(move || {
            let simple = match open_simple(&app_name, Direction::Playback, "playback", sample_rate) {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(cmd) = cmd_rx.recv() {
                if closed_clone.load(Ordering::Relaxed) {
                    break;
                }
                let due = epoch + Duration::from_secs_f64(cmd.start.max(0.0));
                let now = Instant::now();
                if due > now {
                    std::thread::sleep(due - now);
                }
                if let Err(e) = simple.write(bytemuck::cast_slice(&cmd.samples)) {
                    error!("Audio write error: {}", e);
                    break;
                }
            }

            if closed_clone.load(Ordering::Relaxed) {
                let _ = simple.flush();
            } else if let Err(e) = simple.drain() {
                warn!("Audio drain error: {}", e);
            }
            debug!("Playback thread exiting");
        });

        ready_rx
            .await
            .map_err(|_| AudioError::Device("playback thread died".to_string()))??;
        info!("Output device open ({} Hz)", sample_rate);

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Ok(Self {
            epoch,
            sample_rate,
            commands: Some(cmd_tx),
            ended_tx,
            ended_rx: Some(ended_rx),
            timers: Vec::new(),
            closed,
            handle: Some(handle),
        })
    }
}

#[async_trait]
impl AudioOutput for PulseOutput {
    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn play_at(&mut self, samples: Vec<f32>, start: f64) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(AudioError::Closed)?;
        let duration = samples.len() as f64 / self.sample_rate.max(1) as f64;
        let samples: Vec<i16> = super::pcm::to_i16(&samples)
            .into_iter()
            .map(i16::to_le)
            .collect();
        commands
            .send(PlayCommand { samples, start })
            .map_err(|_| AudioError::Closed)?;

        // The simple API only says when data is buffered, so report the end
        // from the wall clock instead.
        let end = start + duration;
        let ended_at = tokio::time::Instant::from_std(self.epoch + Duration::from_secs_f64(end.max(0.0)));
        let ended_tx = self.ended_tx.clone();
        let epoch = self.epoch;
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep_until(ended_at).await;
            let _ = ended_tx.send(epoch.elapsed().as_secs_f64());
        }));
        Ok(())
    }

    fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<f64>> {
        self.ended_rx.take()
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        // Dropping the sender ends the playback thread's loop
        self.commands = None;
        if let Some(handle) = self.handle.take() {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| AudioError::Device(e.to_string()))?
                .map_err(|_| AudioError::Device("playback thread panicked".to_string()))?;
        }
        Ok(())
    }
}
