//! Region Recorder - screen region capture at a fixed frame rate.
//!
//! Captures a rectangle of the screen, optionally records microphone audio,
//! and streams both into an external encoder process (ffmpeg) that writes a
//! single output file.

pub mod capture;
pub mod commands;
pub mod encoder;
pub mod recorder;

#[cfg(test)]
mod test_support;

pub use recorder::{
    CaptureMode, CaptureState, RecorderBackends, RecordingConfig, RecordingError,
    RecordingResult, RecordingSession, RecordingSummary, Region, StatusEvent,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "region_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Region Recorder v{}", env!("CARGO_PKG_VERSION"));
    }
}
