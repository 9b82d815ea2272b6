use crate::{
    error::{BehaviorError, BlackboardError, Result},
    Blackboard, NodeId, NodeType, PortBinding, PortSpec, PortValue, Symbol, TimerQueue,
    WakeUpSignal,
};
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Build-time facts about a node, shared by every [`Context`] created for it.
pub(crate) struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub registration_name: String,
    pub node_type: NodeType,
    pub blackboard: Arc<Blackboard>,
    pub ports: Vec<PortSpec>,
    pub bindings: HashMap<Symbol, PortBinding>,
}

/// What a node sees of the tree while it is ticked: its ports, its
/// blackboard and the tree's wake-up signal and timer service.
///
/// Contexts are cheap to clone and can be moved into worker threads.
#[derive(Clone)]
pub struct Context {
    info: Arc<NodeInfo>,
    wake_up: Arc<WakeUpSignal>,
    timer: Arc<TimerQueue>,
    halt_requested: Option<Arc<AtomicBool>>,
    /// Raised by enclosing decorators whose deadline expired.
    cancelled_by: Vec<Arc<AtomicBool>>,
}

impl Context {
    pub(crate) fn new(
        info: Arc<NodeInfo>,
        wake_up: Arc<WakeUpSignal>,
        timer: Arc<TimerQueue>,
        cancelled_by: Vec<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            info,
            wake_up,
            timer,
            halt_requested: None,
            cancelled_by,
        }
    }

    pub(crate) fn with_halt_flag(&self, flag: Arc<AtomicBool>) -> Self {
        Self {
            halt_requested: Some(flag),
            ..self.clone()
        }
    }

    pub fn id(&self) -> NodeId {
        self.info.id
    }

    /// Instance name given at construction.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Name of the node kind, e.g. `"Sequence"`.
    pub fn registration_name(&self) -> &str {
        &self.info.registration_name
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.info.blackboard
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.info.ports
    }

    pub fn port_binding(&self, key: impl Into<Symbol>) -> Option<&PortBinding> {
        self.info.bindings.get(&key.into())
    }

    fn unbound(&self, key: Symbol) -> BehaviorError {
        BehaviorError::runtime(format!(
            "port [{}] of node [{}] is not bound",
            key, self.info.name
        ))
    }

    fn conversion_failed(&self, key: Symbol, e: impl fmt::Display) -> BehaviorError {
        BehaviorError::runtime(format!(
            "port [{}] of node [{}]: {}",
            key, self.info.name, e
        ))
    }

    /// Reads an input port, converting literals and plain-string entries to `T`.
    ///
    /// A value whose text does not convert is a runtime error, whether it
    /// comes from a literal or from the blackboard.
    pub fn get_input<T: PortValue>(&self, key: impl Into<Symbol>) -> Result<T> {
        let key = key.into();
        let read = match self.info.bindings.get(&key) {
            Some(PortBinding::Literal(text)) => {
                return T::from_port_str(text).map_err(|e| self.conversion_failed(key, e))
            }
            Some(PortBinding::Ref(entry)) => self.info.blackboard.get(*entry),
            Some(PortBinding::Global(entry)) => self.info.blackboard.root().get(*entry),
            None => return Err(self.unbound(key)),
        };
        match read {
            Err(e @ BlackboardError::Conversion { .. }) => Err(self.conversion_failed(key, e)),
            read => Ok(read?),
        }
    }

    /// Like [`Context::get_input`], but an unbound port or an entry that was
    /// never written yields `Ok(None)`.
    pub fn try_get_input<T: PortValue>(&self, key: impl Into<Symbol>) -> Result<Option<T>> {
        let key = key.into();
        if !self.info.bindings.contains_key(&key) {
            return Ok(None);
        }
        match self.get_input(key) {
            Ok(value) => Ok(Some(value)),
            Err(BehaviorError::Blackboard(BlackboardError::MissingEntry(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes an output port. Writing through a literal binding is an error.
    pub fn set_output<T: PortValue>(&self, key: impl Into<Symbol>, value: T) -> Result<()> {
        let key = key.into();
        match self.info.bindings.get(&key) {
            Some(PortBinding::Ref(entry)) => Ok(self.info.blackboard.set(*entry, value)?),
            Some(PortBinding::Global(entry)) => Ok(self.info.blackboard.root().set(*entry, value)?),
            Some(PortBinding::Literal(_)) => Err(BehaviorError::runtime(format!(
                "port [{}] of node [{}] is bound to a literal and cannot be written",
                key, self.info.name
            ))),
            None => Err(self.unbound(key)),
        }
    }

    /// Resolves the blackboard entry a port refers to, if it refers to one.
    pub fn port_entry(&self, key: impl Into<Symbol>) -> Option<(Arc<Blackboard>, Symbol)> {
        match self.info.bindings.get(&key.into())? {
            PortBinding::Ref(entry) => Some((self.info.blackboard.clone(), *entry)),
            PortBinding::Global(entry) => Some((self.info.blackboard.root(), *entry)),
            PortBinding::Literal(_) => None,
        }
    }

    /// Asks the driver to tick the tree again as soon as possible.
    pub fn emit_wake_up_signal(&self) {
        self.wake_up.emit();
    }

    pub fn wake_up_signal(&self) -> Arc<WakeUpSignal> {
        self.wake_up.clone()
    }

    pub fn timer(&self) -> &Arc<TimerQueue> {
        &self.timer
    }

    /// Set when a threaded action running with this context is being halted,
    /// or as soon as the deadline of an enclosing `Timeout` expires.
    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested
            .iter()
            .chain(&self.cancelled_by)
            .any(|flag| flag.load(Ordering::SeqCst))
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("node", &self.info.name)
            .field("id", &self.info.id)
            .field("bindings", &self.info.bindings)
            .finish()
    }
}
