//! Audio input contract and the cpal microphone backend
//!
//! An [`AudioSource`] is an explicitly constructed value handed to the
//! recorder. It is opened on the audio thread itself because platform
//! streams (cpal's included) are usually not `Send`.

use crate::recorder::error::RecordingResult;
use crate::recorder::state::AudioSpec;

/// Fixed-size block of interleaved s16le PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Outcome of one successful [`AudioStream::read`]
#[derive(Debug)]
pub struct AudioRead {
    pub chunk: AudioChunk,
    /// Samples were lost before this chunk because the consumer fell behind
    pub overflowed: bool,
}

/// Opens device streams
pub trait AudioSource: Send + Sync {
    fn open(&self, spec: &AudioSpec) -> RecordingResult<Box<dyn AudioStream>>;
}

/// An open input stream. Lives on the audio thread only.
pub trait AudioStream {
    /// Block until one chunk of `spec.chunk_frames` frames is available
    fn read(&mut self) -> RecordingResult<AudioRead>;

    /// Release the device
    fn close(&mut self);
}

#[cfg(feature = "microphone")]
pub use self::microphone::{
    get_default_input_device, get_input_device_by_name, list_input_devices, CpalAudioSource,
};

#[cfg(feature = "microphone")]
mod microphone {
    use super::{AudioChunk, AudioRead, AudioSource, AudioStream};
    use crate::recorder::error::{RecordingError, RecordingResult};
    use crate::recorder::state::AudioSpec;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Callback buffers allowed to pile up before we start dropping them
    const CALLBACK_QUEUE_DEPTH: usize = 256;

    /// A read gives up after this long so a silent device cannot hang shutdown
    const READ_TIMEOUT: Duration = Duration::from_millis(500);

    /// Get the default audio input device
    pub fn get_default_input_device() -> Option<Device> {
        let host = cpal::default_host();
        host.default_input_device()
    }

    /// Get an audio input device by name
    pub fn get_input_device_by_name(name: &str) -> Option<Device> {
        let host = cpal::default_host();
        host.input_devices()
            .ok()?
            .find(|device| device.name().is_ok_and(|device_name| device_name == name))
    }

    /// Names of all input devices on the default host
    pub fn list_input_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate audio input devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Microphone capture through cpal
    #[derive(Debug, Default)]
    pub struct CpalAudioSource;

    impl CpalAudioSource {
        pub fn new() -> Self {
            Self
        }
    }

    impl AudioSource for CpalAudioSource {
        fn open(&self, spec: &AudioSpec) -> RecordingResult<Box<dyn AudioStream>> {
            let device = match &spec.device_id {
                Some(name) => get_input_device_by_name(name).ok_or_else(|| {
                    RecordingError::DeviceNotFound(format!("Audio device '{}' not found", name))
                })?,
                None => get_default_input_device().ok_or_else(|| {
                    RecordingError::DeviceNotFound("No default audio input device".to_string())
                })?,
            };
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let sample_format = device
                .default_input_config()
                .map_err(|e| {
                    RecordingError::AudioError(format!("Failed to get audio config: {}", e))
                })?
                .sample_format();
            let stream_config = StreamConfig {
                channels: spec.channels,
                sample_rate: SampleRate(spec.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (tx, rx) = flume::bounded::<Vec<i16>>(CALLBACK_QUEUE_DEPTH);
            let overflowed = Arc::new(AtomicBool::new(false));

            let stream = match sample_format {
                SampleFormat::F32 => build_stream(&device, &stream_config, tx, overflowed.clone(), |s: f32| {
                    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                }),
                SampleFormat::I16 => build_stream(&device, &stream_config, tx, overflowed.clone(), |s: i16| s),
                SampleFormat::U16 => build_stream(&device, &stream_config, tx, overflowed.clone(), |s: u16| {
                    (s as i32 - 32768) as i16
                }),
                other => {
                    return Err(RecordingError::AudioError(format!(
                        "Unsupported microphone sample format: {:?}",
                        other
                    )))
                }
            }?;

            stream.play().map_err(|e| {
                RecordingError::AudioError(format!("Failed to start microphone stream: {}", e))
            })?;

            tracing::info!(
                "Microphone stream opened: {} ({}Hz, {}ch, {} frames per chunk)",
                device_name,
                spec.sample_rate,
                spec.channels,
                spec.chunk_frames
            );

            Ok(Box::new(CpalAudioStream {
                stream: Some(stream),
                rx,
                pending: Vec::new(),
                chunk_samples: spec.chunk_frames * spec.channels as usize,
                overflowed,
            }))
        }
    }

    fn build_stream<T, F>(
        device: &Device,
        config: &StreamConfig,
        tx: flume::Sender<Vec<i16>>,
        overflowed: Arc<AtomicBool>,
        convert: F,
    ) -> RecordingResult<Stream>
    where
        T: cpal::SizedSample,
        F: Fn(T) -> i16 + Send + 'static,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<i16> = data.iter().map(|&s| convert(s)).collect();
                    if tx.try_send(samples).is_err() {
                        overflowed.store(true, Ordering::Relaxed);
                    }
                },
                |err| tracing::error!("Microphone stream error: {}", err),
                None,
            )
            .map_err(|e| RecordingError::AudioError(format!("Failed to build audio stream: {}", e)))
    }

    /// Reslices cpal callback buffers into fixed-size chunks
    struct CpalAudioStream {
        stream: Option<Stream>,
        rx: flume::Receiver<Vec<i16>>,
        pending: Vec<i16>,
        chunk_samples: usize,
        overflowed: Arc<AtomicBool>,
    }

    impl AudioStream for CpalAudioStream {
        fn read(&mut self) -> RecordingResult<AudioRead> {
            while self.pending.len() < self.chunk_samples {
                match self.rx.recv_timeout(READ_TIMEOUT) {
                    Ok(samples) => self.pending.extend_from_slice(&samples),
                    Err(flume::RecvTimeoutError::Timeout) => {
                        return Err(RecordingError::AudioError(
                            "Timed out waiting for microphone samples".to_string(),
                        ))
                    }
                    Err(flume::RecvTimeoutError::Disconnected) => {
                        return Err(RecordingError::AudioError(
                            "Microphone stream closed".to_string(),
                        ))
                    }
                }
            }

            let rest = self.pending.split_off(self.chunk_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

            Ok(AudioRead {
                chunk: AudioChunk::new(data),
                overflowed: self.overflowed.swap(false, Ordering::Relaxed),
            })
        }

        fn close(&mut self) {
            // Dropping the stream stops capture
            if let Some(stream) = self.stream.take() {
                let _ = stream.pause();
                tracing::info!("Microphone audio stream stopped");
            }
        }
    }
}
