//! Capture scheduler: the video pacing loop and its lifecycle
//!
//! One [`CaptureScheduler`] runs exactly one recording. It launches the
//! encoder, spawns the audio thread (if enabled) and the video thread, and
//! hands the final result back through [`CaptureScheduler::stop`].
//!
//! The video loop keeps a fixed cadence anchored to its start time. When a
//! tick's deadline has already passed (the previous capture or pipe write
//! overran), the last frame is written again instead of capturing a new one,
//! so the output always holds one frame per tick.

use crate::capture::audio::{AudioChunk, AudioSource};
use crate::capture::frame::{Frame, FrameSource};
use crate::encoder::{EncoderLauncher, EncoderSettings, EncoderSink};
use crate::recorder::audio_loop::{spawn_audio_loop, AudioCounters, AudioLoopHandle};
use crate::recorder::clock::{Clock, SystemClock};
use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::metrics::{skip_percent, Metrics};
use crate::recorder::session::RecordingSummary;
use crate::recorder::state::{CaptureMode, CaptureState, RecordingConfig, Region, SharedState};
use crate::recorder::status::{StatusEvent, StatusReporter};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// External collaborators a recording is wired to
#[derive(Clone)]
pub struct RecorderBackends {
    pub frame_source: Arc<dyn FrameSource>,
    pub audio_source: Option<Arc<dyn AudioSource>>,
    pub encoder: Arc<dyn EncoderLauncher>,
    pub clock: Arc<dyn Clock>,
}

impl RecorderBackends {
    pub fn new(frame_source: Arc<dyn FrameSource>, encoder: Arc<dyn EncoderLauncher>) -> Self {
        Self {
            frame_source,
            audio_source: None,
            encoder,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_audio_source(mut self, audio_source: Arc<dyn AudioSource>) -> Self {
        self.audio_source = Some(audio_source);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Owns the threads and encoder of a single recording
pub struct CaptureScheduler {
    session_id: Uuid,
    state: Arc<SharedState>,
    status: StatusReporter,
    video_thread: Option<JoinHandle<RecordingResult<RecordingSummary>>>,
    /// Result of a recording that ended on its own, held until `stop`
    outcome: Option<RecordingResult<RecordingSummary>>,
}

impl CaptureScheduler {
    /// Validate, launch the encoder and start capturing.
    ///
    /// Nothing is left running when this returns an error.
    pub fn start(
        config: &RecordingConfig,
        backends: &RecorderBackends,
        status: StatusReporter,
    ) -> RecordingResult<Self> {
        config.validate()?;
        let audio_source = match (&backends.audio_source, config.audio_enabled) {
            (Some(source), true) => Some(source.clone()),
            (None, true) => {
                return Err(RecordingError::ConfigurationError(
                    "Audio is enabled but no audio source is configured".to_string(),
                ))
            }
            (_, false) => None,
        };
        if audio_source.is_some() && config.audio.chunks_per_second() > config.fps as f64 {
            tracing::warn!(
                "Audio delivers {:.1} chunks/s but only {} are forwarded per second; audio will trail video until stop",
                config.audio.chunks_per_second(),
                config.fps
            );
        }

        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("recording", session = %session_id);
        let _enter = span.enter();

        let sink = backends
            .encoder
            .launch(&EncoderSettings::from_config(config))?;
        let state = Arc::new(SharedState::new(CaptureState::Recording));

        // On error the encoder sink is dropped here, which closes and reaps it
        let (audio, audio_rx) = match audio_source {
            Some(source) => {
                let (tx, rx) = flume::unbounded();
                let handle = spawn_audio_loop(source, config.audio.clone(), state.clone(), tx)?;
                (Some(handle), Some(rx))
            }
            None => (None, None),
        };

        let worker = VideoWorker::new(
            session_id,
            config,
            state.clone(),
            backends.frame_source.clone(),
            backends.clock.clone(),
            sink,
            status.clone(),
            audio,
            audio_rx,
        );

        let thread_span = span.clone();
        let video_thread = std::thread::Builder::new()
            .name("region-recorder-video".to_string())
            .spawn(move || {
                let _enter = thread_span.enter();
                worker.run()
            });
        let video_thread = match video_thread {
            Ok(handle) => handle,
            Err(e) => {
                // Lets an already running audio thread wind down
                state.set(CaptureState::Done);
                return Err(e.into());
            }
        };

        tracing::info!(
            "Recording started: region {} @ {}fps, audio {}, {:?} mode, output {:?}",
            config.region,
            config.fps,
            if config.audio_enabled { "on" } else { "off" },
            config.mode,
            config.output_path
        );

        Ok(Self {
            session_id,
            state,
            status,
            video_thread: Some(video_thread),
            outcome: None,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    /// Join the video thread of a recording that already reached `Done`.
    ///
    /// Afterwards every status event of this recording has been published.
    /// The result is kept for [`stop`](Self::stop).
    pub fn settle(&mut self) {
        if self.state.get() != CaptureState::Done {
            return;
        }
        if let Some(thread) = self.video_thread.take() {
            self.outcome = Some(self.join(thread));
        }
    }

    /// Ask the loops to finish and block until the encoder has exited.
    ///
    /// If the recording already ended on a fatal error, that error is returned.
    pub fn stop(&mut self) -> RecordingResult<RecordingSummary> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let Some(thread) = self.video_thread.take() else {
            return Err(RecordingError::InvalidState {
                action: "stop",
                state: self.state.get(),
            });
        };

        match self
            .state
            .transition(CaptureState::Recording, CaptureState::Finalizing)
        {
            Ok(()) => tracing::info!(session = %self.session_id, "Stop requested"),
            Err(observed) => tracing::debug!(
                session = %self.session_id,
                "Stop requested after the recording ended ({})",
                observed
            ),
        }

        self.join(thread)
    }

    fn join(
        &self,
        thread: JoinHandle<RecordingResult<RecordingSummary>>,
    ) -> RecordingResult<RecordingSummary> {
        match thread.join() {
            Ok(result) => result,
            Err(_) => {
                self.state.set(CaptureState::Done);
                let error = RecordingError::CaptureError("Video thread panicked".to_string());
                self.status.publish(StatusEvent::Failed {
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        if self.video_thread.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Recording dropped while running: {}", e);
            }
        }
    }
}

/// One captured frame and how many output slots it fills (deferred mode)
struct BufferedFrame {
    frame: Frame,
    repeats: u32,
}

/// Where frames go between capture and the encoder
enum FrameOutput {
    /// Written immediately; the last frame is kept for duplication
    Realtime(Option<Frame>),
    /// Held until stop
    Deferred(Vec<BufferedFrame>),
}

impl FrameOutput {
    fn new(mode: CaptureMode) -> Self {
        match mode {
            CaptureMode::Realtime => FrameOutput::Realtime(None),
            CaptureMode::Deferred => FrameOutput::Deferred(Vec::new()),
        }
    }

    fn has_frame(&self) -> bool {
        match self {
            FrameOutput::Realtime(last) => last.is_some(),
            FrameOutput::Deferred(frames) => !frames.is_empty(),
        }
    }
}

/// State owned by the video thread
pub(crate) struct VideoWorker {
    session_id: Uuid,
    region: Region,
    frame_period: Duration,
    mode: CaptureMode,
    output_path: PathBuf,
    state: Arc<SharedState>,
    frame_source: Arc<dyn FrameSource>,
    clock: Arc<dyn Clock>,
    sink: Box<dyn EncoderSink>,
    status: StatusReporter,
    audio: Option<AudioLoopHandle>,
    audio_rx: Option<flume::Receiver<AudioChunk>>,
    audio_counters: Option<Arc<AudioCounters>>,
    audio_chunks_written: u64,
    metrics: Metrics,
    started_at: DateTime<Utc>,
}

impl VideoWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: Uuid,
        config: &RecordingConfig,
        state: Arc<SharedState>,
        frame_source: Arc<dyn FrameSource>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn EncoderSink>,
        status: StatusReporter,
        audio: Option<AudioLoopHandle>,
        audio_rx: Option<flume::Receiver<AudioChunk>>,
    ) -> Self {
        let metrics = Metrics::new(clock.now(), config.report_interval());
        Self {
            session_id,
            region: config.region,
            frame_period: config.frame_period(),
            mode: config.mode,
            output_path: config.output_path.clone(),
            state,
            frame_source,
            clock,
            sink,
            status,
            audio_counters: audio.as_ref().map(|a| a.counters.clone()),
            audio,
            audio_rx,
            audio_chunks_written: 0,
            metrics,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn run(mut self) -> RecordingResult<RecordingSummary> {
        let result = self
            .capture_loop()
            .and_then(|output| self.finish(output));

        match result {
            Ok(summary) => {
                self.state.set(CaptureState::Done);
                self.status.publish(StatusEvent::Done(summary.clone()));
                tracing::info!(
                    "Recording done: {} frames ({} skipped), {} audio chunks, {:.1}s -> {:?}",
                    summary.frames_written,
                    summary.frame_skips,
                    summary.audio_chunks_written,
                    summary.duration_secs,
                    summary.output_path
                );
                Ok(summary)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Pace, capture and emit frames until the state leaves `Recording`
    fn capture_loop(&mut self) -> RecordingResult<FrameOutput> {
        let mut output = FrameOutput::new(self.mode);
        let mut next_deadline = self.clock.now();

        while self.state.is_recording() {
            let now = self.clock.now();

            if now <= next_deadline || !output.has_frame() {
                self.clock.sleep(next_deadline.saturating_sub(now));
                if !self.state.is_recording() {
                    break;
                }
                let frame = self.frame_source.capture(&self.region)?;
                frame.check_layout(&self.region)?;
                self.emit_fresh(&mut output, frame)?;
                self.metrics.record_frame(false);
            } else {
                // Behind schedule: repeat the last frame instead of capturing
                self.emit_duplicate(&mut output)?;
                self.metrics.record_frame(true);
            }

            if let Some(stats) = self.metrics.report_due(self.clock.now()) {
                tracing::info!(
                    "[RECORDING] Time elapsed: {}s | FPS: {} | Frames written: {} | Frame skips: {} ({}%)",
                    stats.elapsed_secs,
                    stats.fps,
                    stats.frames_written,
                    stats.frame_skips,
                    stats.skip_percent
                );
                self.status.publish(StatusEvent::Recording(stats));
            }

            next_deadline += self.frame_period;
        }

        Ok(output)
    }

    fn emit_fresh(&mut self, output: &mut FrameOutput, frame: Frame) -> RecordingResult<()> {
        match output {
            FrameOutput::Realtime(last) => {
                let frame = last.insert(frame);
                self.sink.write_video_frame(&frame.data)?;
                self.relay_audio_chunk()
            }
            FrameOutput::Deferred(frames) => {
                frames.push(BufferedFrame { frame, repeats: 1 });
                Ok(())
            }
        }
    }

    fn emit_duplicate(&mut self, output: &mut FrameOutput) -> RecordingResult<()> {
        match output {
            FrameOutput::Realtime(Some(frame)) => {
                self.sink.write_video_frame(&frame.data)?;
                self.relay_audio_chunk()
            }
            FrameOutput::Deferred(frames) if !frames.is_empty() => {
                if let Some(last) = frames.last_mut() {
                    last.repeats += 1;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Forward at most one queued audio chunk
    fn relay_audio_chunk(&mut self) -> RecordingResult<()> {
        let Some(rx) = &self.audio_rx else {
            return Ok(());
        };
        if let Ok(chunk) = rx.try_recv() {
            self.sink.write_audio_chunk(&chunk.data)?;
            self.audio_chunks_written += 1;
        }
        Ok(())
    }

    /// Stop audio, flush everything still pending and let the encoder finish the file
    fn finish(&mut self, output: FrameOutput) -> RecordingResult<RecordingSummary> {
        self.status.publish(StatusEvent::Finalizing);
        tracing::info!(
            "Finalizing: {} frames, {} skips",
            self.metrics.frames_written(),
            self.metrics.frame_skips()
        );

        // The audio thread sees the state change and exits after its current read
        if let Some(audio) = self.audio.take() {
            audio.join();
        }

        if let FrameOutput::Deferred(frames) = output {
            tracing::info!("Writing {} buffered captures", frames.len());
            for buffered in frames {
                for _ in 0..buffered.repeats {
                    self.sink.write_video_frame(&buffered.frame.data)?;
                    self.relay_audio_chunk()?;
                }
            }
        }

        if let Some(rx) = self.audio_rx.take() {
            let mut drained = 0;
            while let Ok(chunk) = rx.try_recv() {
                self.sink.write_audio_chunk(&chunk.data)?;
                drained += 1;
            }
            self.audio_chunks_written += drained;
            if drained > 0 {
                tracing::debug!("Drained {} queued audio chunks", drained);
            }
        }

        self.sink.close_input()?;
        self.sink.wait()?;
        Ok(self.summary())
    }

    /// Fatal path: go straight to Done, release everything and report the error
    fn fail(&mut self, error: RecordingError) -> RecordingError {
        tracing::error!(exit_code = ?error.exit_code(), "Recording failed: {}", error);
        self.state.set(CaptureState::Done);

        if let Some(audio) = self.audio.take() {
            audio.join();
        }
        if let Err(e) = self.sink.close_input().and_then(|_| self.sink.wait()) {
            tracing::debug!("Encoder teardown after failure: {}", e);
        }

        self.status.publish(StatusEvent::Failed {
            reason: error.to_string(),
        });
        error
    }

    fn summary(&self) -> RecordingSummary {
        let counter = |read: fn(&AudioCounters) -> u64| {
            self.audio_counters.as_deref().map_or(0, read)
        };
        let frames_written = self.metrics.frames_written();
        let frame_skips = self.metrics.frame_skips();
        let finished_at = Utc::now();

        RecordingSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            finished_at,
            duration_secs: (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0,
            frames_written,
            frame_skips,
            skip_percent: skip_percent(frame_skips, frames_written),
            audio_chunks_written: self.audio_chunks_written,
            audio_overflows: counter(|c| c.overflows.load(Ordering::Relaxed)),
            audio_read_errors: counter(|c| c.read_errors.load(Ordering::Relaxed)),
            output_path: self.output_path.clone(),
        }
    }
}
