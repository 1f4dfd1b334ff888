//! Audio producer thread
//!
//! Reads fixed-size chunks from the device as fast as it delivers them and
//! pushes them onto the audio queue. It never touches the encoder: the video
//! loop relays the chunks so the encoder inputs keep a single writer.

use crate::capture::audio::{AudioChunk, AudioSource, AudioStream};
use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::state::{AudioSpec, SharedState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pause after a failed read so a dead device does not spin the thread
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Counters the audio thread reports back when it exits
#[derive(Debug, Default)]
pub struct AudioCounters {
    pub chunks_captured: AtomicU64,
    pub overflows: AtomicU64,
    pub read_errors: AtomicU64,
}

/// Handle to a running audio thread
pub(crate) struct AudioLoopHandle {
    thread: std::thread::JoinHandle<()>,
    pub(crate) counters: Arc<AudioCounters>,
}

impl AudioLoopHandle {
    pub(crate) fn join(self) -> Arc<AudioCounters> {
        if self.thread.join().is_err() {
            tracing::error!("Audio thread panicked");
        }
        self.counters
    }
}

/// Open the device on a new thread and start filling `queue`.
///
/// Blocks until the device is open so that a missing or unusable device
/// fails the start of the recording instead of silently producing no audio.
pub(crate) fn spawn_audio_loop(
    source: Arc<dyn AudioSource>,
    spec: AudioSpec,
    state: Arc<SharedState>,
    queue: flume::Sender<AudioChunk>,
) -> RecordingResult<AudioLoopHandle> {
    let counters = Arc::new(AudioCounters::default());
    let (ready_tx, ready_rx) = flume::bounded::<RecordingResult<()>>(1);

    let thread_counters = counters.clone();
    let thread = std::thread::Builder::new()
        .name("region-recorder-audio".to_string())
        .spawn(move || {
            let mut stream = match source.open(&spec) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            run_audio_loop(stream.as_mut(), &state, &queue, &thread_counters);
            stream.close();
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(AudioLoopHandle { thread, counters }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(RecordingError::AudioError(
                "Audio thread exited before opening the device".to_string(),
            ))
        }
    }
}

/// Pull chunks until the recording leaves the `Recording` state
pub(crate) fn run_audio_loop(
    stream: &mut dyn AudioStream,
    state: &SharedState,
    queue: &flume::Sender<AudioChunk>,
    counters: &AudioCounters,
) {
    tracing::info!("Audio loop started");

    while state.is_recording() {
        match stream.read() {
            Ok(read) => {
                if read.overflowed {
                    let total = counters.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!("Audio input overflowed ({} so far)", total);
                }
                if queue.send(read.chunk).is_err() {
                    // Consumer is gone, nothing left to feed
                    break;
                }
                counters.chunks_captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.read_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Audio read failed: {}", e);
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }

    tracing::info!(
        "Audio loop stopped ({} chunks, {} overflows, {} read errors)",
        counters.chunks_captured.load(Ordering::Relaxed),
        counters.overflows.load(Ordering::Relaxed),
        counters.read_errors.load(Ordering::Relaxed)
    );
}
