use std::{io, net::UdpSocket};

use crate::{env::Config, error::ConnectionError, utils};

/// The device link as the hub sees it: a control datagram channel both ways
/// and an inbound video datagram channel.
///
/// Receives must return within a bounded time (a timeout error is fine) so the
/// receive loops can observe shutdown.
pub trait Transport: Send + Sync + 'static {
    fn send_ctrl(&self, buff: &[u8]) -> io::Result<usize>;
    fn recv_ctrl(&self, buff: &mut [u8]) -> io::Result<usize>;
    fn recv_video(&self, buff: &mut [u8]) -> io::Result<usize>;
    /// Local port the drone is asked to stream video to.
    fn video_port(&self) -> u16;
}

#[derive(Debug)]
pub struct UdpTransport {
    remote_addr: String,
    video_port: u16,
    ctrl_conn: UdpSocket,
    video_conn: UdpSocket,
}

impl UdpTransport {
    pub fn bind(config: &Config) -> Result<Self, ConnectionError> {
        let video_addr = format!("0.0.0.0:{}", config.video_port);
        Ok(Self {
            remote_addr: config.remote_addr(),
            video_port: config.video_port,
            ctrl_conn: utils::udp_sock("0.0.0.0:0", config.io_timeout)?,
            video_conn: utils::udp_sock(&video_addr, config.io_timeout)?,
        })
    }
}

impl Transport for UdpTransport {
    fn send_ctrl(&self, buff: &[u8]) -> io::Result<usize> {
        self.ctrl_conn.send_to(buff, &self.remote_addr)
    }

    fn recv_ctrl(&self, buff: &mut [u8]) -> io::Result<usize> {
        self.ctrl_conn.recv(buff)
    }

    fn recv_video(&self, buff: &mut [u8]) -> io::Result<usize> {
        self.video_conn.recv(buff)
    }

    fn video_port(&self) -> u16 {
        self.video_port
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        io,
        sync::{
            mpsc::{self, Receiver, RecvTimeoutError, Sender},
            Mutex,
        },
        time::Duration,
    };

    use super::Transport;

    const RECV_TIMEOUT: Duration = Duration::from_millis(10);

    /// Channel backed transport. Tests push datagrams the "drone" sends and
    /// inspect everything the hub sent.
    pub(crate) struct MockTransport {
        ctrl_in: Mutex<Receiver<Vec<u8>>>,
        video_in: Mutex<Receiver<Vec<u8>>>,
        pub(crate) sent: Mutex<Vec<Vec<u8>>>,
        pub(crate) fail_sends: Mutex<u32>,
    }

    pub(crate) struct MockDrone {
        pub(crate) ctrl: Sender<Vec<u8>>,
        pub(crate) video: Sender<Vec<u8>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> (Self, MockDrone) {
            let (ctrl_tx, ctrl_rx) = mpsc::channel();
            let (video_tx, video_rx) = mpsc::channel();
            let transport = Self {
                ctrl_in: Mutex::new(ctrl_rx),
                video_in: Mutex::new(video_rx),
                sent: Mutex::new(Vec::new()),
                fail_sends: Mutex::new(0),
            };
            let drone = MockDrone {
                ctrl: ctrl_tx,
                video: video_tx,
            };
            (transport, drone)
        }
    }

    fn recv_from(rx: &Mutex<Receiver<Vec<u8>>>, buff: &mut [u8]) -> io::Result<usize> {
        match rx.lock().unwrap().recv_timeout(RECV_TIMEOUT) {
            Ok(datagram) => {
                let n = datagram.len().min(buff.len());
                buff[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Err(io::ErrorKind::WouldBlock.into()),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(RECV_TIMEOUT);
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    impl Transport for MockTransport {
        fn send_ctrl(&self, buff: &[u8]) -> io::Result<usize> {
            let mut failures = self.fail_sends.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
            }
            self.sent.lock().unwrap().push(buff.to_vec());
            Ok(buff.len())
        }

        fn recv_ctrl(&self, buff: &mut [u8]) -> io::Result<usize> {
            recv_from(&self.ctrl_in, buff)
        }

        fn recv_video(&self, buff: &mut [u8]) -> io::Result<usize> {
            recv_from(&self.video_in, buff)
        }

        fn video_port(&self) -> u16 {
            6038
        }
    }
}
