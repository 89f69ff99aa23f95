use std::{
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    error::{ProcessExitError, ProcessStartError},
    shutdown::Shutdown,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Decoder argument set: h264 on stdin, raw bgr24 frames of `width x height`
/// on stdout with no framing other than the fixed frame size.
pub fn transcoder_args(width: usize, height: usize) -> Vec<String> {
    [
        "-hwaccel",
        "auto",
        "-hwaccel_device",
        "opencl",
        "-i",
        "pipe:0",
        "-pix_fmt",
        "bgr24",
        "-s",
        &format!("{width}x{height}"),
        "-f",
        "rawvideo",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The running transcoder, minus its pipes which belong to the relay.
pub struct Transcoder {
    program: String,
    child: Child,
}

/// Pipes of a freshly started transcoder. Both exist before any packet can
/// be forwarded.
pub struct TranscoderPipes {
    pub input: ChildStdin,
    pub output: ChildStdout,
}

impl Transcoder {
    pub fn start(
        program: &str,
        args: &[String],
    ) -> Result<(Self, TranscoderPipes), ProcessStartError> {
        let method_name = "start_transcoder";
        let start_err = |source| ProcessStartError {
            program: program.to_owned(),
            source,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(start_err)?;

        let pipes = match (child.stdin.take(), child.stdout.take()) {
            (Some(input), Some(output)) => TranscoderPipes { input, output },
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(start_err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "transcoder pipes not available",
                )));
            }
        };
        tracing::info!(method_name, program, pid = child.id(), "transcoder started");
        let transcoder = Self {
            program: program.to_owned(),
            child,
        };
        Ok((transcoder, pipes))
    }

    /// Watches the process until shutdown, then kills and reaps it. An exit
    /// before shutdown is returned as [`ProcessExitError`]; it ends the video
    /// path only, the flight carries on.
    pub fn supervise(mut self, shutdown: Shutdown) -> JoinHandle<Option<ProcessExitError>> {
        thread::spawn(move || {
            let method_name = "supervise";
            loop {
                match self.child.try_wait() {
                    Ok(Some(status)) => {
                        if shutdown.is_triggered() {
                            return None;
                        }
                        let err = ProcessExitError {
                            program: self.program.clone(),
                            status,
                        };
                        tracing::error!(method_name, "{}, video path is down", err);
                        return Some(err);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(method_name, "can't poll transcoder: {}", e),
                }
                if shutdown.wait_timeout(POLL_INTERVAL) {
                    self.stop();
                    return None;
                }
            }
        })
    }

    fn stop(&mut self) {
        let method_name = "stop_transcoder";
        if let Err(e) = self.child.kill() {
            tracing::debug!(method_name, "transcoder already gone: {}", e);
        }
        match self.child.wait() {
            Ok(status) => tracing::info!(method_name, %status, "transcoder stopped"),
            Err(e) => tracing::warn!(method_name, "can't reap transcoder: {}", e),
        }
    }
}
