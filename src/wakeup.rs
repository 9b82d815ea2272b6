use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Lets asynchronous nodes ask the driver for an out-of-band tick.
///
/// Emitting is sticky: a signal raised while nobody waits is consumed by the next wait.
#[derive(Default)]
pub struct WakeUpSignal {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl WakeUpSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self) {
        *self.ready.lock() = true;
        self.cv.notify_all();
    }

    /// Waits up to `timeout` for a signal. Returns `true` and clears it if one arrived.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !*ready && !timeout.is_zero() {
            let _ = self
                .cv
                .wait_while_for(&mut ready, |ready| !*ready, timeout);
        }
        std::mem::replace(&mut *ready, false)
    }
}
