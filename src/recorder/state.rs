//! Recording configuration and lifecycle state
//!
//! [`RecordingConfig`] is what callers hand to a [`RecordingSession`](crate::recorder::RecordingSession);
//! [`SharedState`] is the one flag the capture threads and the controlling thread share.

use crate::recorder::error::{RecordingError, RecordingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Bytes per pixel of the packed BGRA frames fed to the encoder
pub const BYTES_PER_PIXEL: usize = 4;

/// Default interval between `Recording` status reports
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 1000;

/// Rectangular screen area in pixel coordinates.
///
/// Width and height are always even: the encoder's yuv420p output cannot
/// represent odd dimensions, so odd values are rounded down on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRegion", into = "RawRegion")]
pub struct Region {
    top: i32,
    left: i32,
    width: u32,
    height: u32,
}

#[derive(Serialize, Deserialize)]
struct RawRegion {
    top: i32,
    left: i32,
    width: u32,
    height: u32,
}

impl From<RawRegion> for Region {
    fn from(raw: RawRegion) -> Self {
        Region::new(raw.top, raw.left, raw.width, raw.height)
    }
}

impl From<Region> for RawRegion {
    fn from(region: Region) -> Self {
        RawRegion {
            top: region.top,
            left: region.left,
            width: region.width,
            height: region.height,
        }
    }
}

impl Region {
    pub fn new(top: i32, left: i32, width: u32, height: u32) -> Self {
        Self {
            top,
            left,
            width: width - width % 2,
            height: height - height % 2,
        }
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Exact size in bytes of one BGRA frame of this region
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    pub fn validate(&self) -> RecordingResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecordingError::ConfigurationError(format!(
                "Region must have a positive size, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::new(0, 0, 1000, 1000)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

/// Lifecycle of one capture scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Recording,
    Finalizing,
    Done,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureState::Recording,
            2 => CaptureState::Finalizing,
            3 => CaptureState::Done,
            _ => CaptureState::Idle,
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Recording => write!(f, "recording"),
            CaptureState::Finalizing => write!(f, "finalizing"),
            CaptureState::Done => write!(f, "done"),
        }
    }
}

/// Capture state shared between the controlling thread and the capture loops.
///
/// The controller only ever moves `Recording -> Finalizing`, through
/// compare-and-swap. Every move to `Done` is made by the video loop.
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn is_recording(&self) -> bool {
        self.get() == CaptureState::Recording
    }

    /// Atomically move `from -> to`. Returns the state actually observed on failure.
    pub fn transition(&self, from: CaptureState, to: CaptureState) -> Result<(), CaptureState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(CaptureState::from_u8)
    }

    pub(crate) fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// How captured frames reach the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    /// Frames are written to the encoder as they are captured
    #[default]
    Realtime,
    /// Frames are buffered in memory and written after stop.
    /// Lowers per-frame capture latency at the cost of memory.
    Deferred,
}

/// 48000 Hz / 30 fps
pub const DEFAULT_AUDIO_CHUNK_FRAMES: usize = 1600;

/// Audio input parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSpec {
    /// Input device name; `None` selects the default input device
    pub device_id: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample frames per chunk. The video loop forwards at most one chunk
    /// per frame, so chunks should not arrive faster than the frame rate;
    /// the default covers one frame at 48 kHz and 30 fps.
    pub chunk_frames: usize,
}

impl AudioSpec {
    /// Size in bytes of one s16le chunk
    pub fn chunk_len(&self) -> usize {
        self.chunk_frames * self.channels as usize * 2
    }

    /// Chunks the device delivers per second
    pub fn chunks_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.chunk_frames.max(1) as f64
    }

    fn validate(&self) -> RecordingResult<()> {
        if self.sample_rate == 0 || self.channels == 0 || self.chunk_frames == 0 {
            return Err(RecordingError::ConfigurationError(format!(
                "Invalid audio spec: {}Hz, {}ch, {} frames per chunk",
                self.sample_rate, self.channels, self.chunk_frames
            )));
        }
        Ok(())
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: 48000,
            channels: 2,
            chunk_frames: DEFAULT_AUDIO_CHUNK_FRAMES,
        }
    }
}

/// External encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncoderConfig {
    /// Encoder executable, resolved through `PATH` when not absolute
    pub program: PathBuf,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// How long the encoder must survive after spawn to count as launched
    pub startup_grace_ms: u64,
    /// Passed to `-loglevel`; the encoder's stderr tail ends up in errors
    pub log_level: String,
}

impl EncoderConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            startup_grace_ms: 250,
            log_level: "error".to_string(),
        }
    }
}

/// Everything needed to run one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    pub region: Region,
    pub fps: u32,
    pub audio_enabled: bool,
    pub audio: AudioSpec,
    pub mode: CaptureMode,
    /// Output file, overwritten on every recording
    pub output_path: PathBuf,
    pub encoder: EncoderConfig,
    pub report_interval_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            fps: 30,
            audio_enabled: false,
            audio: AudioSpec::default(),
            mode: CaptureMode::Realtime,
            output_path: PathBuf::from("output.mp4"),
            encoder: EncoderConfig::default(),
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
        }
    }
}

impl RecordingConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> RecordingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            RecordingError::ConfigurationError(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Checks everything that must hold before any thread or process starts
    pub fn validate(&self) -> RecordingResult<()> {
        self.region.validate()?;
        if self.fps == 0 {
            return Err(RecordingError::ConfigurationError(
                "Frame rate must be positive".to_string(),
            ));
        }
        if self.report_interval_ms == 0 {
            return Err(RecordingError::ConfigurationError(
                "Report interval must be positive".to_string(),
            ));
        }
        if self.audio_enabled {
            self.audio.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_dimensions_round_down() {
        let region = Region::new(0, 0, 101, 57);
        assert_eq!(region.width(), 100);
        assert_eq!(region.height(), 56);

        let even = Region::new(5, 7, 640, 480);
        assert_eq!((even.width(), even.height()), (640, 480));
        assert_eq!((even.top(), even.left()), (5, 7));
    }

    #[test]
    fn test_deserialized_region_is_normalized() {
        let region: Region =
            serde_json::from_str(r#"{"top":10,"left":20,"width":333,"height":201}"#).unwrap();
        assert_eq!(region, Region::new(10, 20, 332, 200));
    }

    #[test]
    fn test_frame_len_is_bgra() {
        assert_eq!(Region::new(0, 0, 100, 56).frame_len(), 100 * 56 * 4);
    }

    #[test]
    fn test_one_pixel_region_is_rejected() {
        let config = RecordingConfig {
            region: Region::new(0, 0, 1, 200),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecordingError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_zero_fps_is_rejected() {
        let config = RecordingConfig {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RecordingError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_audio_spec_only_checked_when_enabled() {
        let mut config = RecordingConfig {
            audio: AudioSpec {
                channels: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.audio_enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_audio_chunk_spans_one_frame() {
        let config = RecordingConfig::default();
        let chunk = Duration::from_secs_f64(
            config.audio.chunk_frames as f64 / config.audio.sample_rate as f64,
        );
        assert_eq!(chunk, config.frame_period());
        assert!(config.audio.chunks_per_second() <= config.fps as f64);
    }

    #[test]
    fn test_frame_period() {
        let config = RecordingConfig {
            fps: 30,
            ..Default::default()
        };
        assert_eq!(config.frame_period(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        std::fs::write(
            &path,
            r#"{"region":{"top":0,"left":0,"width":101,"height":57},"fps":60,"audioEnabled":true}"#,
        )
        .unwrap();

        let config = RecordingConfig::load(&path).unwrap();
        assert_eq!(config.region, Region::new(0, 0, 100, 56));
        assert_eq!(config.fps, 60);
        assert!(config.audio_enabled);
        assert_eq!(config.audio, AudioSpec::default());
        assert_eq!(config.output_path, PathBuf::from("output.mp4"));
        assert_eq!(config.encoder.program, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ fps: ").unwrap();

        assert!(matches!(
            RecordingConfig::load(&path),
            Err(RecordingError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_shared_state_transitions() {
        let state = SharedState::new(CaptureState::Recording);
        assert!(state.is_recording());

        assert!(state
            .transition(CaptureState::Recording, CaptureState::Finalizing)
            .is_ok());
        // A fatal error racing with stop loses the CAS and sees Finalizing
        assert_eq!(
            state.transition(CaptureState::Recording, CaptureState::Done),
            Err(CaptureState::Finalizing)
        );
        assert_eq!(state.get(), CaptureState::Finalizing);
    }
}
