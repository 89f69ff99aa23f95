use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Cooperative cancellation shared by every thread of the autopilot.
///
/// Loops check [`Shutdown::is_triggered`] between units of work, timers sleep
/// through [`Shutdown::wait_timeout`] so a trigger wakes them immediately.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !*triggered {
            tracing::info!("shutdown requested");
            *triggered = true;
        }
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`. Returns `true` if shutdown was triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn test_wait_times_out() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let h = thread::spawn(move || {
            let start = Instant::now();
            let triggered = waiter.wait_timeout(Duration::from_secs(10));
            (triggered, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        let (triggered, waited) = h.join().expect("waiter thread");
        assert!(triggered);
        assert!(waited < Duration::from_secs(5));
        assert!(shutdown.wait_timeout(Duration::from_secs(10)));
    }
}
