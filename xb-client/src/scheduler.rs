use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use timer::{Guard, Timer};

use crate::controller::ControllerHandle;

/// A few hundred ms bootstrap delay for the very first reconnect attempt
/// after a failure, ahead of the steady-state `delay` backoff (§4.8).
const BOOTSTRAP_RECONNECT_DELAY: Duration = Duration::from_millis(300);

/// Single rescheduling timer driving pings in ALIVE and reconnects in
/// POLLING (C8, §4.8).
///
/// One `timer::Timer` plus one `Option<Guard>` that gets replaced
/// (dropping, and thereby cancelling, the previous one) every time a new
/// delay is scheduled — rescheduling a timer is just replacing its guard.
pub struct Scheduler {
    timer: Timer,
    guard: Option<Guard>,
    stopped: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            timer: Timer::new(),
            guard: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule the next ping, replacing any previously scheduled timer.
    pub fn schedule_ping(&mut self, interval: Duration, controller: ControllerHandle) {
        if interval.is_zero() {
            self.guard = None;
            return;
        }
        let stopped = self.stopped.clone();
        let delay = time::Duration::from_std(interval).expect("interval");
        self.guard = Some(self.timer.schedule_with_delay(delay, move || {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            controller.on_timer_fire_ping();
        }));
    }

    /// Schedule the next reconnect attempt. `first_attempt` uses a short
    /// bootstrap delay instead of the configured `delay` (§4.8).
    pub fn schedule_reconnect(&mut self, delay: Duration, first_attempt: bool, controller: ControllerHandle) {
        let actual_delay = if first_attempt { BOOTSTRAP_RECONNECT_DELAY } else { delay };
        let stopped = self.stopped.clone();
        let delay = time::Duration::from_std(actual_delay).expect("delay");
        self.guard = Some(self.timer.schedule_with_delay(delay, move || {
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            controller.on_timer_fire_reconnect();
        }));
    }

    /// Cancel any pending timer and prevent future fires from doing work
    /// (§4.8: `doStopPing`).
    pub fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.guard = None;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}
