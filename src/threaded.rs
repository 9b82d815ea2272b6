//! Actions whose `tick` runs on a worker thread.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{
    error::{BehaviorError, Result},
    Context, NodeStatus, PortSpec,
};

/// A blocking action executed off the ticking thread.
///
/// `tick` should poll [`Context::is_halt_requested`] regularly and return
/// early once it is set; halting the node blocks until `tick` has returned.
pub trait ThreadedAction: Send + 'static {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    /// Runs to completion and returns SUCCESS, FAILURE or SKIPPED.
    fn tick(&mut self, ctx: &Context) -> Result<NodeStatus>;

    /// Called on the ticking thread after an interrupted `tick` has returned.
    fn on_halted(&mut self) {}
}

enum WorkerState {
    Running,
    Done(Result<NodeStatus>),
}

struct Shared {
    state: Mutex<WorkerState>,
    cv: Condvar,
}

struct Worker {
    handle: JoinHandle<Box<dyn ThreadedAction>>,
    shared: Arc<Shared>,
    halt_requested: Arc<AtomicBool>,
}

/// Leaf adapter running a [`ThreadedAction`]: the first tick starts the
/// worker and returns RUNNING, later ticks report its outcome once available.
pub struct ThreadedActionNode {
    action: Option<Box<dyn ThreadedAction>>,
    ports: Vec<PortSpec>,
    worker: Option<Worker>,
}

impl ThreadedActionNode {
    pub fn new(action: impl ThreadedAction) -> Self {
        let ports = action.provided_ports();
        Self {
            action: Some(Box::new(action)),
            ports,
            worker: None,
        }
    }

    pub(crate) fn provided_ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn spawn(&mut self, ctx: &Context) -> Result<()> {
        let mut action = self.action.take().ok_or_else(|| {
            BehaviorError::logic(format!("threaded action [{}] lost its state", ctx.name()))
        })?;
        let halt_requested = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::Running),
            cv: Condvar::new(),
        });
        let worker_ctx = ctx.with_halt_flag(halt_requested.clone());
        let worker_shared = shared.clone();
        let name = ctx.name().to_owned();
        let handle = std::thread::Builder::new()
            .name(format!("bt-{}", name))
            .spawn(move || {
                let result = match catch_unwind(AssertUnwindSafe(|| action.tick(&worker_ctx))) {
                    Ok(Ok(NodeStatus::Running | NodeStatus::Idle)) => Err(BehaviorError::logic(
                        format!("threaded action [{}] must not return RUNNING or IDLE", name),
                    )),
                    Ok(result) => result,
                    Err(_) => Err(BehaviorError::runtime(format!(
                        "threaded action [{}] panicked",
                        name
                    ))),
                };
                *worker_shared.state.lock() = WorkerState::Done(result);
                worker_shared.cv.notify_all();
                if !worker_ctx.is_halt_requested() {
                    worker_ctx.emit_wake_up_signal();
                }
                action
            })
            .map_err(|e| BehaviorError::runtime(format!("failed to spawn worker: {}", e)))?;
        debug!("started worker for [{}]", ctx.name());
        self.worker = Some(Worker {
            handle,
            shared,
            halt_requested,
        });
        Ok(())
    }

    /// Joins a finished worker, taking the action back.
    fn join(&mut self, worker: Worker) {
        match worker.handle.join() {
            Ok(action) => self.action = Some(action),
            Err(_) => error!("worker thread could not be joined"),
        }
    }

    pub(crate) fn tick(&mut self, ctx: &Context) -> Result<NodeStatus> {
        if self.worker.is_none() {
            self.spawn(ctx)?;
        }
        let done = match &self.worker {
            Some(worker) => {
                let mut state = worker.shared.state.lock();
                match std::mem::replace(&mut *state, WorkerState::Running) {
                    WorkerState::Running => None,
                    WorkerState::Done(result) => Some(result),
                }
            }
            None => None,
        };
        match done {
            None => Ok(NodeStatus::Running),
            Some(result) => {
                if let Some(worker) = self.worker.take() {
                    self.join(worker);
                }
                result
            }
        }
    }

    /// Requests cancellation and blocks until the worker has returned.
    pub(crate) fn halt(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.halt_requested.store(true, Ordering::SeqCst);
        {
            let mut state = worker.shared.state.lock();
            worker
                .shared
                .cv
                .wait_while(&mut state, |state| matches!(state, WorkerState::Running));
        }
        self.join(worker);
        if let Some(action) = &mut self.action {
            action.on_halted();
        }
    }
}

impl Drop for ThreadedActionNode {
    fn drop(&mut self) {
        self.halt();
    }
}
