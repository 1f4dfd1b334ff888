//! Encoder child process with owned input pipes
//!
//! Video goes to the child's stdin. Audio, when declared, goes to a second
//! anonymous pipe that shows up in the child as `audio_fd`. Dropping an
//! [`EncoderProcess`] closes both inputs and reaps the child, so every exit
//! path of a recording releases the process.

use crate::encoder::EncoderSink;
use crate::recorder::error::{RecordingError, RecordingResult};
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

/// Lines of encoder stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Fully resolved encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Child-side descriptor for the audio pipe, if audio is fed
    pub audio_fd: Option<i32>,
    /// The child must still be running this long after spawn
    pub startup_grace: Duration,
}

/// Running encoder process
pub struct EncoderProcess {
    child: Child,
    video_in: Option<ChildStdin>,
    audio_in: Option<File>,
    stderr_tail: Arc<ParkingMutex<VecDeque<String>>>,
    stderr_thread: Option<std::thread::JoinHandle<()>>,
    reaped: bool,
    frames_written: u64,
}

impl EncoderProcess {
    pub fn spawn(command: &EncoderCommand) -> RecordingResult<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let audio_in = match command.audio_fd {
            Some(fd) => Some(attach_audio_pipe(&mut cmd, fd)?),
            None => None,
        };

        let mut child = cmd.spawn().map_err(|e| {
            RecordingError::ProcessLaunchError(format!(
                "{}: {}",
                command.program.display(),
                e
            ))
        })?;
        // Close the parent's copy of the read end; the child holds its own
        let audio_in = audio_in.map(|pipe| pipe.into_writer());

        let stderr_tail = Arc::new(ParkingMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_thread = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, stderr_tail.clone()));

        let mut process = Self {
            video_in: child.stdin.take(),
            child,
            audio_in,
            stderr_tail,
            stderr_thread,
            reaped: false,
            frames_written: 0,
        };

        if !command.startup_grace.is_zero() {
            std::thread::sleep(command.startup_grace);
            if let Some(status) = process.child.try_wait()? {
                process.reaped = true;
                process.join_stderr();
                return Err(RecordingError::ProcessLaunchError(format!(
                    "{} exited during startup ({}){}",
                    command.program.display(),
                    status,
                    process.stderr_suffix()
                )));
            }
        }

        tracing::debug!(
            "Encoder process {} started: {} {}",
            process.child.id(),
            command.program.display(),
            command.args.join(" ")
        );
        Ok(process)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn stderr_text(&self) -> String {
        self.stderr_tail
            .lock()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn stderr_suffix(&self) -> String {
        let text = self.stderr_text();
        if text.is_empty() {
            String::new()
        } else {
            format!(": {text}")
        }
    }

    fn join_stderr(&mut self) {
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }

    fn broken_pipe(&mut self, stream: &str, e: std::io::Error) -> RecordingError {
        // Reap now so the exit status and stderr make it into the message
        let status = if self.reaped {
            None
        } else {
            self.close_pipes();
            let status = self.child.wait().ok();
            self.reaped = true;
            self.join_stderr();
            status
        };
        let status = status.map_or_else(String::new, |s| format!(" (encoder {})", s));
        RecordingError::PipeBroken(format!("{} write failed: {}{}{}", stream, e, status, self.stderr_suffix()))
    }

    fn close_pipes(&mut self) {
        drop(self.video_in.take());
        drop(self.audio_in.take());
    }
}

impl EncoderSink for EncoderProcess {
    fn write_video_frame(&mut self, bytes: &[u8]) -> RecordingResult<()> {
        let result = match self.video_in.as_mut() {
            Some(stdin) => stdin.write_all(bytes),
            None => return Err(RecordingError::PipeBroken("video input already closed".to_string())),
        };
        match result {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => Err(self.broken_pipe("video", e)),
        }
    }

    fn write_audio_chunk(&mut self, bytes: &[u8]) -> RecordingResult<()> {
        let result = match self.audio_in.as_mut() {
            Some(pipe) => pipe.write_all(bytes),
            None => return Err(RecordingError::PipeBroken("no open audio input".to_string())),
        };
        result.map_err(|e| self.broken_pipe("audio", e))
    }

    fn close_input(&mut self) -> RecordingResult<()> {
        self.close_pipes();
        Ok(())
    }

    fn wait(&mut self) -> RecordingResult<()> {
        if self.reaped {
            return Ok(());
        }
        self.close_pipes();
        let status = self.child.wait()?;
        self.reaped = true;
        self.join_stderr();

        if !status.success() {
            let stderr = self.stderr_text();
            tracing::warn!("Encoder exited with status {}: {}", status, stderr);
            return Err(RecordingError::EncoderExit {
                code: status.code(),
                stderr,
            });
        }

        tracing::info!("Encoder finished: {} frames", self.frames_written);
        Ok(())
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // Close stdin to signal EOF, then wait so no zombie is left behind
        self.close_pipes();
        match self.child.wait() {
            Ok(status) => tracing::debug!("Encoder reaped on drop with status {}", status),
            Err(e) => tracing::warn!("Failed to reap encoder process: {}", e),
        }
        self.join_stderr();
    }
}

fn spawn_stderr_reader(
    stderr: std::process::ChildStderr,
    tail: Arc<ParkingMutex<VecDeque<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            tracing::debug!(target: "region_recorder::encoder", "{}", line);
            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

#[cfg(unix)]
use self::unix_pipe::attach_audio_pipe;

#[cfg(unix)]
mod unix_pipe {
    use crate::recorder::error::{RecordingError, RecordingResult};
    use std::fs::File;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    /// Write end kept by the parent; the read end is only alive until spawn
    pub(super) struct AudioPipe {
        writer: OwnedFd,
        _reader: OwnedFd,
    }

    impl AudioPipe {
        pub(super) fn into_writer(self) -> File {
            File::from(self.writer)
        }
    }

    /// Both ends are created close-on-exec in one step, so a concurrent
    /// spawn elsewhere in the process cannot inherit them
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos",
        target_os = "solaris"
    ))]
    pub(super) fn cloexec_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
        let mut fds = [0; 2];
        // SAFETY: `fds` has room for the two descriptors pipe2(2) writes.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: pipe2(2) succeeded, so both descriptors are open and owned by us.
        Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
    }

    /// No pipe2 here; the descriptors are briefly inheritable before the
    /// flag is set
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos",
        target_os = "solaris"
    )))]
    pub(super) fn cloexec_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
        let mut fds = [0; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
        let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [&reader, &writer] {
            // SAFETY: fd is a valid open descriptor.
            if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok((reader, writer))
    }

    /// Create the audio pipe and arrange for its read end to become `target_fd` in the child
    pub(super) fn attach_audio_pipe(cmd: &mut Command, target_fd: i32) -> RecordingResult<AudioPipe> {
        let (reader, writer) = cloexec_pipe().map_err(|e| {
            RecordingError::ProcessLaunchError(format!("Failed to create audio pipe: {}", e))
        })?;
        let source_fd = reader.as_raw_fd();

        // SAFETY: the closure runs between fork and exec and only calls the
        // async-signal-safe dup2/fcntl.
        unsafe {
            cmd.pre_exec(move || {
                if source_fd == target_fd {
                    // dup2 onto itself keeps CLOEXEC set; clear it instead
                    if libc::fcntl(target_fd, libc::F_SETFD, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(source_fd, target_fd) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(AudioPipe {
            writer,
            _reader: reader,
        })
    }
}

#[cfg(not(unix))]
enum AudioPipe {}

#[cfg(not(unix))]
impl AudioPipe {
    fn into_writer(self) -> File {
        match self {}
    }
}

#[cfg(not(unix))]
fn attach_audio_pipe(_cmd: &mut Command, _target_fd: i32) -> RecordingResult<AudioPipe> {
    Err(RecordingError::ProcessLaunchError(
        "Muxing a second audio input is only supported on Unix".to_string(),
    ))
}
