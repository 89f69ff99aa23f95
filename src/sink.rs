use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Duration,
};

use crate::{error::DisplayError, frame::Frame, frame::FramePool, shutdown::Shutdown};

/// How long `consume` waits for a frame before polling the display again.
const FRAME_WAIT: Duration = Duration::from_millis(30);

/// The surface frames are shown on. Only the thread running the
/// [`FrameSink`] ever touches it.
pub trait Display {
    fn render(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Non-blocking: has the user asked to quit?
    fn exit_requested(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    Rendered,
    /// An empty frame arrived and was not rendered.
    Skipped,
    /// The display failed to show the frame; it is lost.
    Dropped,
    /// No frame within the wait, or the stream has ended.
    Idle,
    /// The display asked to quit or shutdown was triggered elsewhere.
    Exit,
}

pub struct FrameSink<D: Display> {
    display: D,
    frames: Receiver<Frame>,
    pool: FramePool,
    shutdown: Shutdown,
    stream_ended: bool,
    rendered: u64,
}

impl<D: Display> FrameSink<D> {
    pub fn new(display: D, frames: Receiver<Frame>, pool: FramePool, shutdown: Shutdown) -> Self {
        Self {
            display,
            frames,
            pool,
            shutdown,
            stream_ended: false,
            rendered: 0,
        }
    }

    /// Waits a bounded time for the next frame, renders it and polls the
    /// display. An exit request from the display triggers the shared shutdown.
    pub fn consume(&mut self) -> Consumed {
        let method_name = "consume";
        if self.shutdown.is_triggered() {
            return Consumed::Exit;
        }

        let outcome = if self.stream_ended {
            // keep the surface responsive while the flight goes on
            self.shutdown.wait_timeout(FRAME_WAIT);
            Consumed::Idle
        } else {
            match self.frames.recv_timeout(FRAME_WAIT) {
                Ok(frame) if frame.is_empty() => Consumed::Skipped,
                Ok(frame) => {
                    let outcome = match self.display.render(&frame) {
                        Ok(()) => {
                            self.rendered += 1;
                            Consumed::Rendered
                        }
                        Err(e) => {
                            tracing::warn!(method_name, "unable to render frame: {}", e);
                            Consumed::Dropped
                        }
                    };
                    self.pool.release(frame.into_data());
                    outcome
                }
                Err(RecvTimeoutError::Timeout) => Consumed::Idle,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(method_name, "video stream ended, no more frames");
                    self.stream_ended = true;
                    Consumed::Idle
                }
            }
        };

        if self.display.exit_requested() {
            tracing::info!(method_name, "exit requested from display");
            self.shutdown.trigger();
            return Consumed::Exit;
        }
        outcome
    }

    /// Render loop for the main thread. Returns once shutdown is triggered.
    pub fn run(&mut self) {
        while self.consume() != Consumed::Exit {}
        tracing::info!(rendered = self.rendered, "frame sink finished");
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn into_display(self) -> D {
        self.display
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        shown: Vec<u8>,
        polls: usize,
        quit_after_polls: Option<usize>,
        refuse: Option<u8>,
    }

    impl Display for Recorder {
        fn render(&mut self, frame: &Frame) -> Result<(), DisplayError> {
            if self.refuse == Some(frame.data()[0]) {
                return Err(DisplayError::Closed);
            }
            self.shown.push(frame.data()[0]);
            Ok(())
        }

        fn exit_requested(&mut self) -> bool {
            self.polls += 1;
            self.quit_after_polls.is_some_and(|n| self.polls >= n)
        }
    }

    fn frame(v: u8) -> Frame {
        Frame::new(1, 1, vec![v; 3]).unwrap()
    }

    #[test]
    fn test_renders_each_frame_once_in_order() {
        let (tx, rx) = mpsc::channel();
        let shutdown = Shutdown::new();
        let pool = FramePool::new(3, 8);
        let mut sink = FrameSink::new(Recorder::default(), rx, pool.clone(), shutdown.clone());
        for v in 1..=4 {
            tx.send(frame(v)).unwrap();
        }
        tx.send(Frame::new(0, 0, Vec::new()).unwrap()).unwrap();
        drop(tx);

        let mut outcomes = Vec::new();
        for _ in 0..7 {
            outcomes.push(sink.consume());
        }
        assert_eq!(
            vec![
                Consumed::Rendered,
                Consumed::Rendered,
                Consumed::Rendered,
                Consumed::Rendered,
                Consumed::Skipped,
                Consumed::Idle,
                Consumed::Idle
            ],
            outcomes
        );
        assert_eq!(4, sink.rendered());
        assert_eq!(4, pool.idle());
        assert!(!shutdown.is_triggered());
        assert_eq!(vec![1, 2, 3, 4], sink.into_display().shown);
    }

    #[test]
    fn test_render_failure_is_not_counted_as_shown() {
        let (tx, rx) = mpsc::channel();
        let display = Recorder {
            refuse: Some(2),
            ..Default::default()
        };
        let pool = FramePool::new(3, 4);
        let mut sink = FrameSink::new(display, rx, pool.clone(), Shutdown::new());
        for v in 1..=3 {
            tx.send(frame(v)).unwrap();
        }
        let outcomes: Vec<_> = (0..3).map(|_| sink.consume()).collect();
        assert_eq!(
            vec![Consumed::Rendered, Consumed::Dropped, Consumed::Rendered],
            outcomes
        );
        assert_eq!(2, sink.rendered());
        assert_eq!(3, pool.idle());
        assert_eq!(vec![1, 3], sink.into_display().shown);
    }

    #[test]
    fn test_exit_request_triggers_shutdown() {
        let (tx, rx) = mpsc::channel();
        let shutdown = Shutdown::new();
        let display = Recorder {
            quit_after_polls: Some(2),
            ..Default::default()
        };
        let mut sink = FrameSink::new(display, rx, FramePool::new(3, 2), shutdown.clone());
        tx.send(frame(1)).unwrap();
        tx.send(frame(2)).unwrap();
        tx.send(frame(3)).unwrap();

        sink.run();
        assert!(shutdown.is_triggered());
        assert_eq!(vec![1, 2], sink.into_display().shown);
    }

    #[test]
    fn test_external_shutdown_stops_sink() {
        let (_tx, rx) = mpsc::channel();
        let shutdown = Shutdown::new();
        let mut sink = FrameSink::new(Recorder::default(), rx, FramePool::new(3, 2), shutdown.clone());
        shutdown.trigger();
        assert_eq!(Consumed::Exit, sink.consume());
    }
}
