//! Timed flight commands.
//!
//! Every scheduled command gets its own timer thread, so a slow action never
//! shifts the firing time of another command. Offsets are measured from
//! [`Sequencer::start`], which the autopilot calls on the `Connected` event.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::shutdown::Shutdown;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Fired,
    Done,
    Rescheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Fire once, this long after start.
    Once(Duration),
    /// Fire at start and then every period until shutdown.
    Every(Duration),
}

pub type Action = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ScheduledCommand {
    name: &'static str,
    timing: Timing,
    action: Action,
    state: Arc<Mutex<CommandState>>,
    fired: Arc<AtomicU64>,
}

impl ScheduledCommand {
    pub fn new(name: &'static str, timing: Timing, action: Action) -> Self {
        let timing = match timing {
            Timing::Every(period) => Timing::Every(period.max(MIN_PERIOD)),
            once => once,
        };
        Self {
            name,
            timing,
            action,
            state: Arc::new(Mutex::new(CommandState::Pending)),
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn state(&self) -> CommandState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: CommandState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn fire(&self) {
        tracing::debug!(command = self.name, "firing");
        self.set_state(CommandState::Fired);
        (self.action)();
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    fn run(self, start: Instant, shutdown: Shutdown) {
        match self.timing {
            Timing::Once(delay) => {
                if wait_until(&shutdown, start + delay) {
                    tracing::debug!(command = self.name, "cancelled before firing");
                    return;
                }
                self.fire();
                self.set_state(CommandState::Done);
            }
            Timing::Every(period) => {
                let mut tick: u32 = 0;
                while !wait_until(&shutdown, start + period * tick) {
                    self.fire();
                    self.set_state(CommandState::Rescheduled);
                    // ticks missed by a slow action are skipped, not bunched up
                    let elapsed = start.elapsed().as_nanos() / period.as_nanos();
                    tick = u32::try_from(elapsed).unwrap_or(u32::MAX - 1) + 1;
                }
                tracing::debug!(command = self.name, fired = self.fired(), "stopped");
            }
        }
    }
}

/// Sleeps until `deadline`. Returns `true` if shutdown came first.
fn wait_until(shutdown: &Shutdown, deadline: Instant) -> bool {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return shutdown.is_triggered();
        }
        if shutdown.wait_timeout(deadline - now) {
            return true;
        }
    }
}

pub struct Sequencer {
    commands: Vec<ScheduledCommand>,
    shutdown: Shutdown,
    started: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Sequencer {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            commands: Vec::new(),
            shutdown,
            started: AtomicBool::new(false),
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn once<F>(self, name: &'static str, delay: Duration, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(ScheduledCommand::new(name, Timing::Once(delay), Arc::new(action)))
    }

    pub fn every<F>(self, name: &'static str, period: Duration, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(ScheduledCommand::new(name, Timing::Every(period), Arc::new(action)))
    }

    pub fn schedule(mut self, command: ScheduledCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Starts every timer. Only the first call does anything; returns whether
    /// this call started the timers.
    pub fn start(&self) -> bool {
        let method_name = "start_sequencer";
        if self.shutdown.is_triggered() {
            tracing::warn!(method_name, "shutdown already requested, not starting");
            return false;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::debug!(method_name, "already started");
            return false;
        }
        let start = Instant::now();
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for command in self.commands.iter().cloned() {
            tracing::info!(method_name, command = command.name, timing = ?command.timing, "scheduled");
            let shutdown = self.shutdown.clone();
            timers.push(thread::spawn(move || command.run(start, shutdown)));
        }
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn command(&self, name: &str) -> Option<&ScheduledCommand> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Waits for every timer to finish. Repeating timers only finish on
    /// shutdown.
    pub fn join(&self) {
        let timers: Vec<_> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for h in timers {
            if h.join().is_err() {
                tracing::error!("sequencer timer panicked");
            }
        }
    }
}
