//! Audio pipeline
//!
//! PCM transcoding ([`pcm`]), gapless playback scheduling ([`playback`]),
//! optional WAV recording of a session ([`recorder`]) and the device seams the
//! live session drives. With the `pulse` feature, [`pulse::PulseDevices`]
//! implements the seams on top of PulseAudio.

pub mod pcm;
pub mod playback;
#[cfg(feature = "pulse")]
pub mod pulse;
pub mod recorder;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Rate the backend expects microphone audio at
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the audio the backend sends back
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame
pub const FRAME_SIZE: usize = 4096;

/// Error type for audio operations
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("PCM payload has odd length {0}")]
    OddLength(usize),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio device closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Shape of the captured microphone stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
}

impl Default for CaptureSpec {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            channels: 1,
        }
    }
}

/// Access to the host's audio hardware
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open an output device running at `sample_rate`.
    async fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>>;

    /// Ask for microphone access and start capturing frames.
    async fn open_microphone(&self, spec: CaptureSpec) -> Result<Box<dyn Microphone>>;
}

/// A playback device with its own monotonically increasing clock, in seconds
#[async_trait]
pub trait AudioOutput: Send {
    fn current_time(&self) -> f64;

    /// Queue `samples` to start at device time `start`.
    fn play_at(&mut self, samples: Vec<f32>, start: f64) -> Result<()>;

    /// Receiver of "a chunk finished playing" notifications, carrying the
    /// device time at which it ended. Can be taken once.
    fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<f64>>;

    /// Stop everything queued and release the device.
    async fn close(&mut self) -> Result<()>;
}

/// A capturing microphone delivering fixed-size mono frames
#[async_trait]
pub trait Microphone: Send {
    /// Frames of `frame_size` samples in [-1, 1]. Can be taken once.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<Vec<f32>>>;

    /// Stop the underlying capture tracks.
    fn stop(&mut self);

    /// Release the input device.
    async fn close(&mut self) -> Result<()>;
}
