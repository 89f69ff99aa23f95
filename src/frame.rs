use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DecodeError;

/// A decoded bgr24 image. `data.len()` is always `width * height * 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = width * height * 3;
        if data.len() != expected {
            return Err(DecodeError::ShortFrame {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// A zero sized frame carries nothing to show.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Recycles frame buffers between the relay reader and the sink.
#[derive(Debug, Clone)]
pub struct FramePool {
    frame_size: usize,
    max_idle: usize,
    idle: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FramePool {
    pub fn new(frame_size: usize, max_idle: usize) -> Self {
        Self {
            frame_size,
            max_idle,
            idle: Arc::new(Mutex::new(Vec::with_capacity(max_idle))),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Buffer of exactly `frame_size` bytes, reused when one is available.
    pub fn acquire(&self) -> Vec<u8> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(mut buff) => {
                buff.resize(self.frame_size, 0);
                buff
            }
            None => vec![0; self.frame_size],
        }
    }

    pub fn release(&self, buff: Vec<u8>) {
        if buff.capacity() < self.frame_size {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(buff);
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
