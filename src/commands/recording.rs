//! Recording commands

use crate::recorder::{
    CaptureState, RecordingConfig, RecordingResult, RecordingSession, RecordingSummary,
    StatusReceiver,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to the recording session
#[derive(Clone)]
pub struct RecorderState {
    pub session: Arc<Mutex<RecordingSession>>,
}

impl RecorderState {
    pub fn new(session: RecordingSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}

/// Get list of available audio input devices (microphones)
#[cfg(feature = "microphone")]
pub async fn get_audio_devices() -> Result<Vec<String>, String> {
    tokio::task::spawn_blocking(crate::capture::audio::list_input_devices)
        .await
        .map_err(|e| e.to_string())
}

/// Start recording, optionally replacing the configuration first.
///
/// The returned receiver observes every event of the new recording.
pub async fn start_recording(
    state: &RecorderState,
    config: Option<RecordingConfig>,
) -> Result<StatusReceiver, String> {
    let mut session = state.session.clone().lock_owned().await;

    // Launch waits out the encoder startup grace period
    tokio::task::spawn_blocking(move || -> RecordingResult<StatusReceiver> {
        if let Some(config) = config {
            session.set_config(config)?;
        }
        let receiver = session.subscribe();
        session.start()?;
        Ok(receiver)
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())
}

/// Stop recording and wait for the output file to be finalized
pub async fn stop_recording(state: &RecorderState) -> Result<RecordingSummary, String> {
    let mut session = state.session.clone().lock_owned().await;

    tokio::task::spawn_blocking(move || session.stop())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

/// Get current recording state
pub async fn get_recording_state(state: &RecorderState) -> Result<CaptureState, String> {
    let session = state.session.lock().await;
    Ok(session.state())
}

/// Get the configuration the next recording will use
pub async fn get_recording_config(state: &RecorderState) -> Result<RecordingConfig, String> {
    let session = state.session.lock().await;
    Ok(session.config().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{RecorderBackends, Region, StatusEvent};
    use crate::test_support::{MockLauncher, SequenceSource};
    use std::time::Duration;

    fn state_with(launcher: &MockLauncher) -> RecorderState {
        let config = RecordingConfig {
            region: Region::new(0, 0, 32, 32),
            fps: 50,
            ..Default::default()
        };
        let backends = RecorderBackends::new(
            Arc::new(SequenceSource::new(config.region)),
            Arc::new(launcher.clone()),
        );
        RecorderState::new(RecordingSession::new(config, backends))
    }

    #[tokio::test]
    async fn test_start_and_stop_through_commands() {
        let launcher = MockLauncher::new();
        let state = state_with(&launcher);

        let status = start_recording(&state, None).await.unwrap();
        assert_eq!(get_recording_state(&state).await, Ok(CaptureState::Recording));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = stop_recording(&state).await.unwrap();
        assert!(summary.frames_written > 0);
        assert_eq!(get_recording_state(&state).await, Ok(CaptureState::Done));

        let mut last = None;
        while let Some(event) = status.poll() {
            last = Some(event);
        }
        assert_eq!(last, Some(StatusEvent::Done(summary)));
    }

    #[tokio::test]
    async fn test_stop_without_recording_returns_message() {
        let state = state_with(&MockLauncher::new());
        let err = stop_recording(&state).await.unwrap_err();
        assert!(err.contains("idle"), "unexpected message: {}", err);
    }

    #[tokio::test]
    async fn test_start_replaces_config() {
        let launcher = MockLauncher::new();
        let state = state_with(&launcher);
        let config = RecordingConfig {
            region: Region::new(0, 0, 32, 32),
            fps: 25,
            output_path: "replaced.mp4".into(),
            ..Default::default()
        };

        start_recording(&state, Some(config)).await.unwrap();
        assert_eq!(get_recording_config(&state).await.unwrap().fps, 25);
        let summary = stop_recording(&state).await.unwrap();

        assert_eq!(summary.output_path, std::path::PathBuf::from("replaced.mp4"));
        assert_eq!(launcher.last_settings().map(|s| s.fps), Some(25));
    }

    #[tokio::test]
    async fn test_start_with_config_after_failed_recording() {
        let launcher = MockLauncher::new().breaking_after(2);
        let state = state_with(&launcher);

        let first = start_recording(&state, None).await.unwrap();
        let terminal = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match first.recv_async().await {
                    Some(event) if event.is_terminal() => break Some(event),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(terminal, Some(StatusEvent::Failed { .. })));

        let config = RecordingConfig {
            region: Region::new(0, 0, 32, 32),
            fps: 40,
            ..Default::default()
        };
        let status = start_recording(&state, Some(config)).await.unwrap();
        assert_eq!(get_recording_state(&state).await, Ok(CaptureState::Recording));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = stop_recording(&state).await.unwrap();
        assert_eq!(launcher.launches(), 2);
        assert_eq!(launcher.last_settings().map(|s| s.fps), Some(40));

        let events = status.drain();
        assert!(!events.iter().any(|e| matches!(e, StatusEvent::Failed { .. })));
        assert_eq!(events.last(), Some(&StatusEvent::Done(summary)));
    }
}
