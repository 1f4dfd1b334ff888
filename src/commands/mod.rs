//! Async command handlers
//!
//! Thin async wrappers around [`RecordingSession`](crate::recorder::RecordingSession)
//! for callers running on a tokio runtime. Blocking recorder calls are moved
//! off the async threads and errors are flattened to strings.

pub mod recording;
