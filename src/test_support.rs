//! In-memory backends shared by the recorder tests

use crate::capture::audio::{AudioChunk, AudioRead, AudioSource, AudioStream};
use crate::capture::frame::{Frame, FrameSource};
use crate::encoder::{EncoderLauncher, EncoderSettings, EncoderSink};
use crate::recorder::clock::Clock;
use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::state::{AudioSpec, Region};
use parking_lot::Mutex as ParkingMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything a mock encoder was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkOp {
    Video(Vec<u8>),
    Audio(Vec<u8>),
    CloseInput,
    Wait,
}

#[derive(Default)]
struct MockShared {
    ops: Vec<SinkOp>,
    launches: usize,
    settings: Vec<EncoderSettings>,
    exit_code: Option<i32>,
    fail_launch: bool,
    break_after_frames: Option<usize>,
    write_clock: Option<Arc<dyn Clock>>,
    write_delays: HashMap<usize, Duration>,
}

/// Launcher whose sinks record into a shared log
#[derive(Clone, Default)]
pub(crate) struct MockLauncher {
    shared: Arc<ParkingMutex<MockShared>>,
}

impl MockLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `wait` reports this exit code
    pub(crate) fn exiting_with(self, code: i32) -> Self {
        self.shared.lock().exit_code = Some(code);
        self
    }

    pub(crate) fn failing_launch(self) -> Self {
        self.shared.lock().fail_launch = true;
        self
    }

    /// The first encoder's video writes fail with `PipeBroken` once
    /// `frames` have been accepted. Later launches behave normally.
    pub(crate) fn breaking_after(self, frames: usize) -> Self {
        self.shared.lock().break_after_frames = Some(frames);
        self
    }

    /// Video writes listed in `delays` (by index within one sink) take that
    /// long on `clock`, as if the encoder stopped reading for a while
    pub(crate) fn with_write_delays(
        self,
        clock: Arc<dyn Clock>,
        delays: HashMap<usize, Duration>,
    ) -> Self {
        {
            let mut shared = self.shared.lock();
            shared.write_clock = Some(clock);
            shared.write_delays = delays;
        }
        self
    }

    pub(crate) fn ops(&self) -> Vec<SinkOp> {
        self.shared.lock().ops.clone()
    }

    pub(crate) fn launches(&self) -> usize {
        self.shared.lock().launches
    }

    pub(crate) fn last_settings(&self) -> Option<EncoderSettings> {
        self.shared.lock().settings.last().cloned()
    }

    pub(crate) fn video_frames(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Video(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn audio_chunks(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Audio(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }
}

impl EncoderLauncher for MockLauncher {
    fn launch(&self, settings: &EncoderSettings) -> RecordingResult<Box<dyn EncoderSink>> {
        let mut shared = self.shared.lock();
        shared.launches += 1;
        shared.settings.push(settings.clone());
        if shared.fail_launch {
            return Err(RecordingError::ProcessLaunchError(
                "mock encoder refused to start".to_string(),
            ));
        }
        let break_after_frames = match shared.launches {
            1 => shared.break_after_frames,
            _ => None,
        };
        Ok(Box::new(MockSink {
            shared: self.shared.clone(),
            frames: 0,
            break_after_frames,
            closed: false,
        }))
    }
}

struct MockSink {
    shared: Arc<ParkingMutex<MockShared>>,
    frames: usize,
    break_after_frames: Option<usize>,
    closed: bool,
}

impl EncoderSink for MockSink {
    fn write_video_frame(&mut self, bytes: &[u8]) -> RecordingResult<()> {
        if self.break_after_frames.is_some_and(|limit| self.frames >= limit) {
            return Err(RecordingError::PipeBroken(
                "mock encoder went away".to_string(),
            ));
        }

        let stall = {
            let shared = self.shared.lock();
            let stall = shared
                .write_delays
                .get(&self.frames)
                .and_then(|delay| shared.write_clock.clone().map(|clock| (clock, *delay)));
            stall
        };
        if let Some((clock, delay)) = stall {
            clock.sleep(delay);
        }

        let mut shared = self.shared.lock();
        shared.ops.push(SinkOp::Video(bytes.to_vec()));
        self.frames += 1;
        Ok(())
    }

    fn write_audio_chunk(&mut self, bytes: &[u8]) -> RecordingResult<()> {
        self.shared.lock().ops.push(SinkOp::Audio(bytes.to_vec()));
        Ok(())
    }

    fn close_input(&mut self) -> RecordingResult<()> {
        if !self.closed {
            self.closed = true;
            self.shared.lock().ops.push(SinkOp::CloseInput);
        }
        Ok(())
    }

    fn wait(&mut self) -> RecordingResult<()> {
        let mut shared = self.shared.lock();
        shared.ops.push(SinkOp::Wait);
        match shared.exit_code {
            Some(code) if code != 0 => Err(RecordingError::EncoderExit {
                code: Some(code),
                stderr: "mock encoder failed".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Frame source that stamps each frame with its capture index
pub(crate) struct SequenceSource {
    region: Region,
    next: AtomicU64,
    clock: Option<Arc<dyn Clock>>,
    delays: HashMap<u64, Duration>,
    fail_at: Option<u64>,
}

impl SequenceSource {
    /// Frames always have the layout of `region`, whatever is requested
    pub(crate) fn new(region: Region) -> Self {
        Self {
            region,
            next: AtomicU64::new(0),
            clock: None,
            delays: HashMap::new(),
            fail_at: None,
        }
    }

    /// Captures listed in `delays` take that long on `clock`
    pub(crate) fn with_clock(mut self, clock: Arc<dyn Clock>, delays: HashMap<u64, Duration>) -> Self {
        self.clock = Some(clock);
        self.delays = delays;
        self
    }

    pub(crate) fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub(crate) fn captures(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub(crate) fn index_of(frame: &[u8]) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&frame[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl FrameSource for SequenceSource {
    fn capture(&self, _region: &Region) -> RecordingResult<Frame> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(index) {
            return Err(RecordingError::CaptureError(format!(
                "capture {} failed",
                index
            )));
        }
        if let (Some(clock), Some(delay)) = (&self.clock, self.delays.get(&index)) {
            clock.sleep(*delay);
        }

        let mut data = vec![0u8; self.region.frame_len()];
        data[..8].copy_from_slice(&index.to_le_bytes());
        Ok(Frame::new(data, self.region.width(), self.region.height()))
    }
}

/// Audio source producing numbered chunks at a steady real-time rate
#[derive(Debug, Clone)]
pub(crate) struct TickingAudioSource {
    interval: Duration,
    produced: Arc<AtomicU64>,
}

impl TickingAudioSource {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            produced: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub(crate) fn sequence_of(chunk: &[u8]) -> u64 {
        SequenceSource::index_of(chunk)
    }
}

impl AudioSource for TickingAudioSource {
    fn open(&self, spec: &AudioSpec) -> RecordingResult<Box<dyn AudioStream>> {
        Ok(Box::new(TickingStream {
            chunk_len: spec.chunk_len(),
            interval: self.interval,
            produced: self.produced.clone(),
        }))
    }
}

struct TickingStream {
    chunk_len: usize,
    interval: Duration,
    produced: Arc<AtomicU64>,
}

impl AudioStream for TickingStream {
    fn read(&mut self) -> RecordingResult<AudioRead> {
        std::thread::sleep(self.interval);
        let sequence = self.produced.fetch_add(1, Ordering::SeqCst);
        let mut data = vec![0u8; self.chunk_len.max(8)];
        data[..8].copy_from_slice(&sequence.to_le_bytes());
        Ok(AudioRead {
            chunk: AudioChunk::new(data),
            overflowed: false,
        })
    }

    fn close(&mut self) {}
}
