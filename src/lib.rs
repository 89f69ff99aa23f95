use std::sync::mpsc::{self, Receiver, SyncSender};

pub mod autopilot;
pub(crate) mod crc;
pub mod env;
pub mod error;
pub mod frame;
pub mod hub;
pub mod messages;
pub mod player;
pub mod relay;
pub mod sequencer;
pub mod shutdown;
pub mod sink;
pub mod transcoder;
pub mod transport;
pub(crate) mod utils;

#[macro_use]
extern crate lazy_static;

pub use error::{Error, Result};
pub use frame::Frame;

pub type FrameRecvChannel = Receiver<Frame>;
pub type FramePublishChannel = SyncSender<Frame>;
pub type FrameChannel = (FramePublishChannel, FrameRecvChannel);

/// At most `in_flight` decoded frames wait for the sink; the reader drops
/// the rest.
pub fn frame_channel(in_flight: usize) -> FrameChannel {
    mpsc::sync_channel(in_flight)
}
