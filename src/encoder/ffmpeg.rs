//! FFmpeg invocation for raw BGRA video (+ s16le audio) input

use crate::encoder::process::{EncoderCommand, EncoderProcess};
use crate::encoder::{EncoderLauncher, EncoderSettings, EncoderSink};
use crate::recorder::error::RecordingResult;

/// File descriptor the child reads raw audio from (`pipe:3`)
pub const AUDIO_INPUT_FD: i32 = 3;

/// Builds the ffmpeg argument list for one recording
pub struct FfmpegCommandBuilder<'a> {
    settings: &'a EncoderSettings,
    log_level: &'a str,
}

impl<'a> FfmpegCommandBuilder<'a> {
    /// Log level comes from the encoder config unless overridden
    pub fn new(settings: &'a EncoderSettings) -> Self {
        Self {
            settings,
            log_level: &settings.encoder.log_level,
        }
    }

    pub fn with_log_level(mut self, level: &'a str) -> Self {
        self.log_level = level;
        self
    }

    pub fn build(&self) -> EncoderCommand {
        let s = self.settings;
        let enc = &s.encoder;

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            self.log_level.into(),
            "-y".into(), // Overwrite output
            // Input 0: raw frames on stdin
            "-f".into(),
            "rawvideo".into(),
            "-vcodec".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "bgra".into(),
            "-s".into(),
            format!("{}x{}", s.region.width(), s.region.height()),
            "-r".into(),
            s.fps.to_string(),
            "-i".into(),
            "pipe:0".into(),
        ];

        if let Some(audio) = &s.audio {
            // Input 1: interleaved PCM on the extra pipe
            args.extend([
                "-f".into(),
                "s16le".into(),
                "-ar".into(),
                audio.sample_rate.to_string(),
                "-ac".into(),
                audio.channels.to_string(),
                "-i".into(),
                format!("pipe:{AUDIO_INPUT_FD}"),
            ]);
        }

        args.extend([
            "-c:v".into(),
            enc.video_codec.clone(),
            "-preset".into(),
            enc.preset.clone(),
            "-crf".into(),
            enc.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);

        if s.audio.is_some() {
            args.extend([
                "-c:a".into(),
                enc.audio_codec.clone(),
                "-b:a".into(),
                enc.audio_bitrate.clone(),
            ]);
        }

        args.push(s.output_path.to_string_lossy().to_string());

        EncoderCommand {
            program: enc.program.clone(),
            args,
            audio_fd: s.audio.as_ref().map(|_| AUDIO_INPUT_FD),
            startup_grace: enc.startup_grace(),
        }
    }
}

/// Launches ffmpeg as the encoder process
#[derive(Debug, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, settings: &EncoderSettings) -> RecordingResult<Box<dyn EncoderSink>> {
        let command = FfmpegCommandBuilder::new(settings).build();
        tracing::info!(
            "Starting FFmpeg encoder: {}x{} @ {}fps{}, output: {:?}",
            settings.region.width(),
            settings.region.height(),
            settings.fps,
            if settings.audio.is_some() { " with audio" } else { "" },
            settings.output_path
        );
        Ok(Box::new(EncoderProcess::spawn(&command)?))
    }
}
