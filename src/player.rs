use std::{
    io::Write,
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{error::DisplayError, frame::Frame, sink::Display};

/// On-screen window backed by an external player reading raw bgr24 frames
/// from its stdin. Closing the window (or `q`) ends the player, which is
/// reported as an exit request.
pub struct PlayerWindow {
    program: String,
    width: usize,
    height: usize,
    child: Child,
    stdin: Option<ChildStdin>,
}

pub fn player_args(width: usize, height: usize) -> Vec<String> {
    vec![
        "-really-quiet".to_owned(),
        "-nosound".to_owned(),
        "-demuxer".to_owned(),
        "rawvideo".to_owned(),
        "-rawvideo".to_owned(),
        format!("w={width}:h={height}:format=bgr24"),
        "-".to_owned(),
    ]
}

impl PlayerWindow {
    pub fn open(program: &str, width: usize, height: usize) -> Result<Self, DisplayError> {
        let method_name = "open";
        let mut child = Command::new(program)
            .args(player_args(width, height))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DisplayError::Open {
                program: program.to_owned(),
                source,
            })?;
        let stdin = child.stdin.take();
        if stdin.is_none() {
            tracing::warn!(method_name, program, "can't open player stdin");
        }
        tracing::info!(method_name, program, width, height, "player window opened");
        Ok(Self {
            program: program.to_owned(),
            width,
            height,
            child,
            stdin,
        })
    }

    /// Kills and reaps the player. Dropping the window does the same.
    pub fn close(self) {}
}

impl Drop for PlayerWindow {
    fn drop(&mut self) {
        let method_name = "close";
        drop(self.stdin.take());
        if let Err(e) = self.child.kill() {
            tracing::debug!(method_name, "player already gone: {}", e);
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!(method_name, program = self.program, "can't reap player: {}", e);
        }
    }
}

impl Display for PlayerWindow {
    fn render(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        // rawvideo has no framing, a wrong sized frame would shear every later one
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(DisplayError::FrameSize {
                width: self.width,
                height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or(DisplayError::Closed)?;
        if let Err(e) = stdin.write_all(frame.data()) {
            // the player quit; exit_requested reports it on this cycle
            self.stdin = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn exit_requested(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(program = self.program, %status, "player exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(program = self.program, "can't poll player: {}", e);
                false
            }
        }
    }
}
