//! External encoder process
//!
//! The scheduler only sees [`EncoderSink`]: a blocking byte sink for frames
//! and audio chunks with an explicit end-of-stream and exit wait.
//! [`FfmpegLauncher`] is the production implementation.

pub mod ffmpeg;
pub mod process;

pub use ffmpeg::{FfmpegCommandBuilder, FfmpegLauncher};
pub use process::{EncoderCommand, EncoderProcess};

use crate::recorder::error::RecordingResult;
use crate::recorder::state::{AudioSpec, EncoderConfig, RecordingConfig, Region};
use std::path::PathBuf;

/// Input stream declarations for one encoder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub region: Region,
    pub fps: u32,
    /// `Some` when an audio input must be declared
    pub audio: Option<AudioSpec>,
    pub output_path: PathBuf,
    pub encoder: EncoderConfig,
}

impl EncoderSettings {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            region: config.region,
            fps: config.fps,
            audio: config.audio_enabled.then(|| config.audio.clone()),
            output_path: config.output_path.clone(),
            encoder: config.encoder.clone(),
        }
    }
}

/// Blocking sink fed exclusively by the video loop thread
pub trait EncoderSink: Send {
    /// Write one frame. `PipeBroken` if the encoder has gone away.
    fn write_video_frame(&mut self, bytes: &[u8]) -> RecordingResult<()>;

    fn write_audio_chunk(&mut self, bytes: &[u8]) -> RecordingResult<()>;

    /// Signal end-of-stream on every input. Idempotent.
    fn close_input(&mut self) -> RecordingResult<()>;

    /// Block until the encoder exits. `EncoderExit` on a failure status.
    fn wait(&mut self) -> RecordingResult<()>;
}

/// Starts one encoder per recording
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, settings: &EncoderSettings) -> RecordingResult<Box<dyn EncoderSink>>;
}
