//! Recording session: configuration plus the lifecycle of its recordings

use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::scheduler::{CaptureScheduler, RecorderBackends};
use crate::recorder::state::{CaptureMode, CaptureState, RecordingConfig, Region};
use crate::recorder::status::{StatusReceiver, StatusReporter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Final accounting of a completed recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Includes duplicated frames
    pub frames_written: u64,
    pub frame_skips: u64,
    pub skip_percent: u32,
    pub audio_chunks_written: u64,
    pub audio_overflows: u64,
    pub audio_read_errors: u64,
    pub output_path: PathBuf,
}

/// Holds the configuration and drives one recording at a time.
///
/// Settings can only change while no recording is running. After a
/// recording finishes the session reports `Done` until the configuration is
/// changed or a new recording is started.
pub struct RecordingSession {
    config: RecordingConfig,
    backends: RecorderBackends,
    status: StatusReporter,
    scheduler: Option<CaptureScheduler>,
    finished: bool,
}

impl RecordingSession {
    pub fn new(config: RecordingConfig, backends: RecorderBackends) -> Self {
        Self {
            config,
            backends,
            status: StatusReporter::new(),
            scheduler: None,
            finished: false,
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        match &self.scheduler {
            Some(scheduler) => scheduler.state(),
            None if self.finished => CaptureState::Done,
            None => CaptureState::Idle,
        }
    }

    /// Id of the attached recording, if any
    pub fn session_id(&self) -> Option<Uuid> {
        self.scheduler.as_ref().map(CaptureScheduler::session_id)
    }

    /// Receive status events for the running recording, or the next one
    /// if none is running
    pub fn subscribe(&mut self) -> StatusReceiver {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.settle();
        }
        self.renew_status();
        self.status.subscribe()
    }

    pub fn set_config(&mut self, config: RecordingConfig) -> RecordingResult<()> {
        self.ensure_detached("change the configuration")?;
        self.config = config;
        self.finished = false;
        Ok(())
    }

    /// Region is normalized to even dimensions by [`Region::new`]
    pub fn set_region(&mut self, region: Region) -> RecordingResult<()> {
        self.ensure_detached("change the region")?;
        self.config.region = region;
        self.finished = false;
        Ok(())
    }

    pub fn set_frame_rate(&mut self, fps: u32) -> RecordingResult<()> {
        self.ensure_detached("change the frame rate")?;
        self.config.fps = fps;
        self.finished = false;
        Ok(())
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> RecordingResult<()> {
        self.ensure_detached("toggle audio")?;
        self.config.audio_enabled = enabled;
        self.finished = false;
        Ok(())
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) -> RecordingResult<()> {
        self.ensure_detached("change the capture mode")?;
        self.config.mode = mode;
        self.finished = false;
        Ok(())
    }

    /// Launch the encoder and begin capturing. Returns once frames are flowing.
    pub fn start(&mut self) -> RecordingResult<()> {
        match self.scheduler.as_ref().map(CaptureScheduler::state) {
            Some(state @ (CaptureState::Recording | CaptureState::Finalizing)) => {
                return Err(RecordingError::InvalidState {
                    action: "start",
                    state,
                });
            }
            Some(_) => self.retire_finished(),
            None => {}
        }
        self.renew_status();

        let scheduler = CaptureScheduler::start(&self.config, &self.backends, self.status.clone())?;
        self.scheduler = Some(scheduler);
        self.finished = false;
        Ok(())
    }

    /// Stop capturing and wait for the encoder to finish the output file.
    ///
    /// Returns the error that ended the recording if it failed on its own.
    pub fn stop(&mut self) -> RecordingResult<RecordingSummary> {
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(RecordingError::InvalidState {
                action: "stop",
                state: self.state(),
            });
        };

        let result = scheduler.stop();
        self.finished = true;
        result
    }

    /// Refuse while a recording runs; collect one that already ended
    fn ensure_detached(&mut self, action: &'static str) -> RecordingResult<()> {
        match self.scheduler.as_ref().map(CaptureScheduler::state) {
            Some(state @ (CaptureState::Recording | CaptureState::Finalizing)) => {
                Err(RecordingError::InvalidState { action, state })
            }
            Some(_) => {
                self.retire_finished();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Collect a recording that already ended on an error nobody stopped
    fn retire_finished(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Previous recording ended with an error: {}", e);
        }
    }

    /// Subscribers taken after a recording's terminal event belong to the next one
    fn renew_status(&mut self) {
        if self.status.is_closed() {
            self.status = StatusReporter::new();
        }
    }
}
