//! Recording engine
//!
//! A [`RecordingSession`] owns the configuration and starts one
//! [`CaptureScheduler`] per recording. The scheduler runs the video pacing
//! loop and the audio producer on their own threads and feeds the encoder.

pub mod audio_loop;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod status;

pub use audio_loop::AudioCounters;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RecordingError, RecordingResult};
pub use metrics::RecordingStats;
pub use scheduler::{CaptureScheduler, RecorderBackends};
pub use session::{RecordingSession, RecordingSummary};
pub use state::{AudioSpec, CaptureMode, CaptureState, EncoderConfig, RecordingConfig, Region};
pub use status::{StatusEvent, StatusReceiver, StatusReporter};
