//! Connection & event hub.
//!
//! [`Hub`] collects handlers per [`EventKind`] and then [`Hub::connect`]s,
//! which freezes the registry, starts the receive loops and performs the
//! `conn_req`/`conn_ack` handshake. Events are queued to one worker thread per
//! event kind, so handlers never run on a receive loop and a slow handler only
//! delays later events of its own kind.

use chrono::{Datelike, Timelike};
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, OnceLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    error::{CommandError, ConnectionError},
    messages::{self, Command, TelloPacket},
    shutdown::Shutdown,
    transport::Transport,
    utils,
};

/// Consecutive failed sends after which the link is considered lost.
pub const MAX_CONSECUTIVE_SEND_FAILURES: u32 = 10;

const CONNECT_RETRY: Duration = Duration::from_millis(500);
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    VideoFrame,
    Disconnected,
    Error,
}

/// One chunk of the compressed video stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPacket(Vec<u8>);

impl VideoPacket {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    VideoFrame(VideoPacket),
    Disconnected,
    Error(String),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::VideoFrame(_) => EventKind::VideoFrame,
            Event::Disconnected => EventKind::Disconnected,
            Event::Error(_) => EventKind::Error,
        }
    }
}

pub type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

enum Dispatch {
    Event(Event),
    Stop,
}

/// Routes events to the per kind worker queues. Cheap to clone.
#[derive(Clone, Default)]
struct Dispatcher {
    queues: Arc<HashMap<EventKind, Sender<Dispatch>>>,
}

impl Dispatcher {
    fn start(registry: HashMap<EventKind, Vec<Handler>>) -> (Self, Vec<JoinHandle<()>>) {
        let mut queues = HashMap::new();
        let mut workers = Vec::new();
        for (kind, handlers) in registry {
            let (tx, rx) = mpsc::channel::<Dispatch>();
            queues.insert(kind, tx);
            workers.push(thread::spawn(move || {
                let method_name = "dispatch";
                for msg in rx {
                    let event = match msg {
                        Dispatch::Event(event) => event,
                        Dispatch::Stop => break,
                    };
                    for handler in handlers.iter() {
                        let r = panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                        if r.is_err() {
                            tracing::error!(method_name, ?kind, "event handler panicked");
                        }
                    }
                }
                tracing::debug!(method_name, ?kind, "dispatch worker finished");
            }));
        }
        let dispatcher = Self {
            queues: Arc::new(queues),
        };
        (dispatcher, workers)
    }

    /// Never blocks: the queues are unbounded.
    fn emit(&self, event: Event) {
        let kind = event.kind();
        match self.queues.get(&kind) {
            Some(tx) => {
                if tx.send(Dispatch::Event(event)).is_err() {
                    tracing::trace!(?kind, "dispatcher stopped, event dropped");
                }
            }
            None => tracing::trace!(?kind, "no handler registered"),
        }
    }

    fn stop(&self) {
        for tx in self.queues.values() {
            let _ = tx.send(Dispatch::Stop);
        }
    }
}

struct DeviceInner<T: Transport> {
    transport: T,
    ctrl_seq: AtomicU16,
    connected: AtomicBool,
    closed: AtomicBool,
    send_failures: AtomicU32,
    events: OnceLock<Dispatcher>,
}

/// Handle used to command the drone. Clones share the same session.
pub struct Device<T: Transport> {
    inner: Arc<DeviceInner<T>>,
}

impl<T: Transport> Clone for Device<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Device<T> {
    fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                transport,
                ctrl_seq: AtomicU16::new(0),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                send_failures: AtomicU32::new(0),
                events: OnceLock::new(),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Sends a control command. Safe to call from any thread; each call is a
    /// single datagram so no extra serialization is needed.
    pub fn send(&self, command: Command) -> Result<(), CommandError> {
        let method_name = "send";
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let seq = if command.sequenced() {
            self.inner.ctrl_seq.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        let msg = command.encode(seq);
        match self.inner.transport.send_ctrl(&msg) {
            Ok(_) => {
                self.inner.send_failures.store(0, Ordering::Relaxed);
                tracing::debug!(method_name, command = command.name(), seq, "sent");
                Ok(())
            }
            Err(source) => {
                let failures = self.inner.send_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= MAX_CONSECUTIVE_SEND_FAILURES {
                    tracing::error!(method_name, failures, "giving up on the link");
                    self.mark_disconnected();
                    return Err(CommandError::LinkLost(failures));
                }
                Err(CommandError::Transport {
                    command: command.name(),
                    source,
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    fn emit(&self, event: Event) {
        if let Some(dispatcher) = self.inner.events.get() {
            dispatcher.emit(event);
        }
    }

    fn mark_disconnected(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            tracing::info!("disconnected from tello");
            self.emit(Event::Disconnected);
        }
    }

    fn running(&self, shutdown: &Shutdown) -> bool {
        !shutdown.is_triggered() && !self.inner.closed.load(Ordering::Acquire)
    }

    fn next_seq(&self) -> u16 {
        self.inner.ctrl_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn reply(&self, method_name: &str, msg: &[u8]) {
        if let Err(e) = self.inner.transport.send_ctrl(msg) {
            tracing::warn!(method_name, "unable to reply: {}", e);
        }
    }

    fn send_date_time(&self) {
        let method_name = "send_date_time";
        let now = chrono::Local::now();
        let msg = messages::send_date_time(
            self.next_seq(),
            now.year() as u16,
            now.month() as u16,
            now.day() as u16,
            now.hour() as u16,
            now.minute() as u16,
            now.second() as u16,
            now.timestamp_subsec_millis() as u16,
        );
        self.reply(method_name, &msg);
    }

    fn ack_log_header(&self, pl: &[u8]) {
        let method_name = "ack_log_header";
        if pl.len() < 2 {
            tracing::warn!(method_name, "log header payload too short");
            return;
        }
        let msg = TelloPacket::ack_log(self.next_seq(), &[pl[0], pl[1]]).to_buffer();
        self.reply(method_name, &msg);
    }

    fn process_packet(&self, pkt: &TelloPacket) {
        let method_name = "process_packet";
        match pkt.message_id {
            messages::MSG_SET_DATE_TIME => {
                tracing::debug!(method_name, "date time requested");
                self.send_date_time();
            }
            messages::MSG_LOG_HEADER => {
                tracing::debug!(method_name, "log header received");
                self.ack_log_header(&pkt.payload);
            }
            messages::MSG_FLIGHT_STATUS => {
                tracing::trace!(method_name, "flight status received");
            }
            messages::MSG_LOG_DATA => {
                tracing::trace!(method_name, "log data received");
            }
            messages::MSG_DO_TAKEOFF | messages::MSG_DO_LAND => {
                tracing::info!(method_name, "flight command acknowledged: {:x}", pkt.message_id);
            }
            _ => {
                tracing::debug!(method_name, "not handled: {:x}", pkt.message_id);
            }
        }
    }
}

fn ctrl_receiver<T: Transport>(device: Device<T>, ack: Sender<()>, shutdown: Shutdown) {
    let method_name = "ctrl_recv";
    let mut buff = [0u8; 4096];

    while device.running(&shutdown) {
        let nread = match device.inner.transport.recv_ctrl(&mut buff) {
            Ok(n) => n,
            Err(e) if utils::is_timeout(&e) => continue,
            Err(e) => {
                tracing::warn!(method_name, "udp read error: {}", e);
                device.emit(Event::Error(format!("control read error: {e}")));
                shutdown.wait_timeout(RECV_ERROR_BACKOFF);
                continue;
            }
        };
        let datagram = &buff[..nread];
        if !device.is_connected() && nread == 11 {
            if utils::contains_any(datagram, b"conn_ack:").is_some() {
                let _ = ack.send(());
            } else {
                tracing::warn!(method_name, "unexpected response to connect request");
            }
            continue;
        }
        match TelloPacket::from_buffer(datagram) {
            Ok(pkt) => device.process_packet(&pkt),
            Err(e) => tracing::warn!(method_name, "dropping control packet: {}", e),
        }
    }
    tracing::debug!(method_name, "finished");
}

fn video_receiver<T: Transport>(device: Device<T>, shutdown: Shutdown) {
    let method_name = "video_recv";
    let mut buff = [0u8; 2048];

    while device.running(&shutdown) {
        let nread = match device.inner.transport.recv_video(&mut buff) {
            Ok(n) => n,
            Err(e) if utils::is_timeout(&e) => continue,
            Err(e) => {
                tracing::warn!(method_name, "udp read error: {}", e);
                device.emit(Event::Error(format!("video read error: {e}")));
                shutdown.wait_timeout(RECV_ERROR_BACKOFF);
                continue;
            }
        };
        // first two bytes are the drone's sequence prefix
        if nread <= 2 {
            tracing::trace!(method_name, nread, "empty video datagram");
            continue;
        }
        tracing::trace!(method_name, nread, "read video stream data");
        device.emit(Event::VideoFrame(VideoPacket::new(buff[2..nread].to_vec())));
    }
    tracing::debug!(method_name, "finished");
}

pub struct Hub<T: Transport> {
    device: Device<T>,
    handlers: HashMap<EventKind, Vec<Handler>>,
    shutdown: Shutdown,
}

impl<T: Transport> Hub<T> {
    pub fn new(transport: T, shutdown: Shutdown) -> Self {
        Self {
            device: Device::new(transport),
            handlers: HashMap::new(),
            shutdown,
        }
    }

    /// Handle for sending commands, usable from handlers registered before
    /// the session exists.
    pub fn device(&self) -> Device<T> {
        self.device.clone()
    }

    /// Registers `handler` for `kind`. Handlers of one kind run in
    /// registration order for every occurrence.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    pub fn connect(self, timeout: Duration) -> Result<Session<T>, ConnectionError> {
        let method_name = "connect";
        let Hub {
            device,
            handlers,
            shutdown,
        } = self;

        let (dispatcher, mut threads) = Dispatcher::start(handlers);
        let _ = device.inner.events.set(dispatcher.clone());

        let (ack_tx, ack_rx) = mpsc::channel();
        {
            let device = device.clone();
            let shutdown = shutdown.clone();
            threads.push(thread::spawn(move || {
                ctrl_receiver(device, ack_tx, shutdown)
            }));
        }
        {
            let device = device.clone();
            let shutdown = shutdown.clone();
            threads.push(thread::spawn(move || video_receiver(device, shutdown)));
        }

        let session = Session {
            device,
            dispatcher,
            threads,
        };

        let request = messages::connect(session.device.inner.transport.video_port());
        let deadline = Instant::now() + timeout;
        loop {
            if shutdown.is_triggered() {
                session.close();
                return Err(ConnectionError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::error!(method_name, ?timeout, "no answer from tello");
                session.close();
                return Err(ConnectionError::Timeout(timeout));
            }
            tracing::info!(method_name, "waiting to connect to tello...");
            if let Err(e) = session.device.inner.transport.send_ctrl(&request) {
                tracing::warn!(method_name, "unable to send connect request: {}", e);
            }
            match ack_rx.recv_timeout(CONNECT_RETRY.min(deadline - now)) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    session.close();
                    return Err(ConnectionError::Cancelled);
                }
            }
        }

        session.device.inner.connected.store(true, Ordering::Release);
        tracing::info!(method_name, "connected to tello");
        session.emit(Event::Connected);
        Ok(session)
    }
}

/// A connected hub. Handlers are frozen, receive loops and dispatch workers
/// are running until [`Session::close`].
pub struct Session<T: Transport> {
    device: Device<T>,
    dispatcher: Dispatcher,
    threads: Vec<JoinHandle<()>>,
}

impl<T: Transport> Session<T> {
    pub fn device(&self) -> Device<T> {
        self.device.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.device.state()
    }

    /// Queues `event` for its handlers and returns immediately.
    pub fn emit(&self, event: Event) {
        self.dispatcher.emit(event);
    }

    /// Emits `Disconnected` (if still connected), lets the workers drain what
    /// is already queued and joins every session thread.
    pub fn close(self) {
        self.device.mark_disconnected();
        self.device.inner.closed.store(true, Ordering::Release);
        self.dispatcher.stop();
        for h in self.threads {
            if h.join().is_err() {
                tracing::error!("session thread panicked");
            }
        }
    }
}
