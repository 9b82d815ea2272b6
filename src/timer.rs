//! Background timer service backing `Timeout`, `Delay` and `Sleep`.
//!
//! One worker thread per tree, started on the first [`TimerQueue::add`].
//! Handlers run on that thread with no lock held.

use crate::Context;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error};

pub type TimerId = u64;

type Handler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Queue {
    /// Ordered by deadline, then by id so equal deadlines keep insertion order.
    pending: BTreeMap<(Instant, TimerId), Handler>,
    next_id: TimerId,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

#[derive(Default)]
pub struct TimerQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `handler` once `delay` has elapsed, unless cancelled first.
    pub fn add(&self, delay: Duration, handler: impl FnOnce() + Send + 'static) -> TimerId {
        self.ensure_worker();
        let mut queue = self.shared.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        queue
            .pending
            .insert((Instant::now() + delay, id), Box::new(handler));
        drop(queue);
        self.shared.cv.notify_all();
        debug!("timer {} armed for {:?}", id, delay);
        id
    }

    /// Returns `true` if the timer was still pending. A handler already running is not interrupted.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut queue = self.shared.queue.lock();
        let key = queue.pending.keys().find(|(_, pending)| *pending == id).copied();
        let cancelled = key.and_then(|key| queue.pending.remove(&key)).is_some();
        drop(queue);
        if cancelled {
            debug!("timer {} cancelled", id);
            self.shared.cv.notify_all();
        }
        cancelled
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let shared = self.shared.clone();
        match std::thread::Builder::new()
            .name("bt-timer".to_owned())
            .spawn(move || run(&shared))
        {
            Ok(handle) => *worker = Some(handle),
            Err(e) => error!("failed to spawn timer thread: {}", e),
        }
    }
}

fn run(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }
        let now = Instant::now();
        let next = queue.pending.keys().next().copied();
        match next {
            Some(key) if key.0 <= now => {
                if let Some(handler) = queue.pending.remove(&key) {
                    drop(queue);
                    handler();
                    queue = shared.queue.lock();
                }
            }
            Some((deadline, _)) => {
                shared.cv.wait_for(&mut queue, deadline - now);
            }
            None => shared.cv.wait(&mut queue),
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.cv.notify_all();
        if let Some(handle) = self.worker.get_mut().take() {
            if handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

/// A one-shot timer owned by a node. On expiry it raises a flag and wakes the
/// tree up. The node polls the flag on its next tick, and may also hand it to
/// its child as a cancellation request raised from the timer thread.
#[derive(Default)]
pub(crate) struct TimerGuard {
    armed: Option<(Arc<TimerQueue>, TimerId, Arc<AtomicBool>)>,
}

impl TimerGuard {
    pub fn arm(&mut self, ctx: &Context, delay: Duration) {
        self.disarm();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let wake_up = ctx.wake_up_signal();
        let id = ctx.timer().add(delay, move || {
            flag.store(true, Ordering::SeqCst);
            wake_up.emit();
        });
        self.armed = Some((ctx.timer().clone(), id, fired));
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn fired(&self) -> bool {
        self.armed
            .as_ref()
            .map(|(_, _, fired)| fired.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// The flag raised on expiry, while armed.
    pub fn flag(&self) -> Option<Arc<AtomicBool>> {
        self.armed.as_ref().map(|(_, _, fired)| fired.clone())
    }

    pub fn disarm(&mut self) {
        if let Some((timer, id, _)) = self.armed.take() {
            timer.cancel(id);
        }
    }
}
