//! Capture sources
//!
//! Leaf producers of raw data: screen frames and audio chunks. Each has a
//! trait the scheduler depends on and an optional platform backend behind a
//! cargo feature.

pub mod audio;
pub mod frame;

#[cfg(feature = "screen")]
pub mod screen;

pub use audio::{AudioChunk, AudioRead, AudioSource, AudioStream};
pub use frame::{Frame, FrameSource};

#[cfg(feature = "screen")]
pub use screen::XcapFrameSource;

#[cfg(feature = "microphone")]
pub use audio::CpalAudioSource;
