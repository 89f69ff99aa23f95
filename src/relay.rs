//! Video relay: compressed packets go into the transcoder input, fixed size
//! decoded frames come out of its output.
//!
//! The two directions are independent. [`Relay::forward`] is called from the
//! video event handler, [`FrameReader`] runs on its own thread doing blocking
//! reads, so neither cadence can stall the other.

use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{SyncSender, TrySendError},
        Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    error::{DecodeError, RelayError},
    frame::{Frame, FramePool},
    hub::VideoPacket,
    shutdown::Shutdown,
};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub struct Relay<W: Write + Send> {
    sink: Mutex<W>,
    closed: AtomicBool,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl<W: Write + Send> Relay<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Writes the packet to the transcoder input. A failed write drops just
    /// this packet; a broken pipe closes the relay for good.
    pub fn forward(&self, packet: &VideoPacket) -> Result<(), RelayError> {
        let method_name = "forward";
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::Closed);
        }
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let r = sink
            .write_all(packet.as_bytes())
            .and_then(|_| sink.flush());
        match r {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.closed.swap(true, Ordering::AcqRel) {
                    tracing::error!(method_name, "transcoder input closed, video path is down");
                }
                Err(RelayError::Closed)
            }
            Err(source) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::Write {
                    len: packet.len(),
                    source,
                })
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fills `buff` completely. `Ok(false)` means the stream ended cleanly on a
/// frame boundary.
fn read_frame<R: Read>(source: &mut R, buff: &mut [u8]) -> Result<bool, DecodeError> {
    let mut filled = 0;
    while filled < buff.len() {
        match source.read(&mut buff[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(DecodeError::ShortFrame {
                    expected: buff.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(DecodeError::Read {
                    read: filled,
                    source,
                })
            }
        }
    }
    Ok(true)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    pub delivered: u64,
    /// Malformed or partial frames.
    pub discarded: u64,
    /// Whole frames the sink had no room for.
    pub dropped: u64,
}

/// Reads fixed size frames (the pool's frame size) from the transcoder
/// output and pushes them, in order, to the sink's bounded channel. The
/// reader never waits for the sink: a frame that finds the channel full is
/// dropped so the transcoder output keeps draining. Dropping the sender at
/// the end of the stream is what tells the sink no more frames will come.
pub struct FrameReader<R: Read> {
    source: R,
    width: usize,
    height: usize,
    pool: FramePool,
    frames: SyncSender<Frame>,
    shutdown: Shutdown,
}

impl<R: Read + Send + 'static> FrameReader<R> {
    pub fn new(
        source: R,
        width: usize,
        height: usize,
        pool: FramePool,
        frames: SyncSender<Frame>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            width,
            height,
            pool,
            frames,
            shutdown,
        }
    }

    pub fn run(mut self) -> ReaderStats {
        let method_name = "frame_reader";
        let mut stats = ReaderStats::default();
        let frame_size = self.pool.frame_size();

        while !self.shutdown.is_triggered() {
            let mut buff = self.pool.acquire();
            buff.resize(frame_size, 0);
            match read_frame(&mut self.source, &mut buff) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(method_name, "transcoder output closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(method_name, "discarding frame: {}", e);
                    stats.discarded += 1;
                    let backoff = matches!(e, DecodeError::Read { .. });
                    self.pool.release(buff);
                    if backoff {
                        self.shutdown.wait_timeout(READ_ERROR_BACKOFF);
                    }
                    continue;
                }
            }
            let frame = match Frame::new(self.width, self.height, buff) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(method_name, "discarding frame: {}", e);
                    stats.discarded += 1;
                    continue;
                }
            };
            match self.frames.try_send(frame) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(frame)) => {
                    tracing::debug!(method_name, "frame sink is behind, frame dropped");
                    stats.dropped += 1;
                    self.pool.release(frame.into_data());
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(method_name, "frame sink is gone");
                    break;
                }
            }
        }
        tracing::info!(
            method_name,
            delivered = stats.delivered,
            discarded = stats.discarded,
            dropped = stats.dropped,
            "finished"
        );
        stats
    }

    pub fn spawn(self) -> JoinHandle<ReaderStats> {
        thread::spawn(move || self.run())
    }
}
