//! Hierarchical, type-checked key/value store shared between nodes.
//!
//! Every subtree gets its own [`Blackboard`] whose parent is the blackboard
//! of the enclosing tree. A key can be linked to a parent key with
//! [`Blackboard::add_remapping`]; the entry then lives in the parent and is
//! visible from both sides. Keys starting with `@` always resolve in the
//! root blackboard.

use crate::{
    convert::{AnyValue, TypeInfo},
    error::BlackboardError,
    PortValue, Symbol,
};
use parking_lot::Mutex;
use std::{
    any::Any,
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::debug;

/// Marker type for ports that accept entries of any type.
/// Values behind such ports are usually read through their textual form.
#[derive(Clone, Debug)]
pub struct AnyTypeAllowed;

impl PortValue for AnyTypeAllowed {}

struct EntryData {
    value: Option<AnyValue>,
    info: TypeInfo,
    /// Set once a port declared the type of this entry.
    port_locked: bool,
    sequence_id: u64,
    stamp: Option<Instant>,
}

pub(crate) struct Entry {
    data: Mutex<EntryData>,
}

/// Snapshot of the metadata of an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub type_info: TypeInfo,
    /// Incremented on every successful write.
    pub sequence_id: u64,
    /// Time of the last write.
    pub stamp: Option<Instant>,
    pub has_value: bool,
}

impl Entry {
    fn new(info: TypeInfo, port_locked: bool) -> Self {
        Self {
            data: Mutex::new(EntryData {
                value: None,
                info,
                port_locked: port_locked && !info.is::<AnyTypeAllowed>(),
                sequence_id: 0,
                stamp: None,
            }),
        }
    }

    fn lock_type(&self, key: Symbol, info: TypeInfo) -> Result<(), BlackboardError> {
        if info.is::<AnyTypeAllowed>() {
            return Ok(());
        }
        let mut data = self.data.lock();
        if data.info == info {
            data.port_locked = true;
            return Ok(());
        }
        if data.info.is::<AnyTypeAllowed>() {
            data.info = info;
            data.port_locked = true;
            return Ok(());
        }
        // A value written as plain text takes the type of the first port declaring it.
        if !data.port_locked && data.info.is_string() {
            if let Some(text) = data.value.as_ref().and_then(|v| v.downcast_ref::<String>()) {
                let converted = info
                    .parse(text)
                    .map_err(|source| BlackboardError::Conversion { key, source })?;
                data.value = Some(converted);
            }
            data.info = info;
            data.port_locked = true;
            return Ok(());
        }
        Err(BlackboardError::TypeMismatch {
            key,
            expected: data.info.type_name(),
            found: info.type_name(),
        })
    }

    fn write<T: PortValue>(&self, key: Symbol, value: T) -> Result<(), BlackboardError> {
        let mut data = self.data.lock();
        let stored: AnyValue = if data.info.is::<T>() {
            Arc::new(value)
        } else if data.info.is::<AnyTypeAllowed>() {
            data.info = TypeInfo::of::<T>();
            Arc::new(value)
        } else if let Some(text) = (&value as &dyn Any).downcast_ref::<String>() {
            data.info
                .parse(text)
                .map_err(|source| BlackboardError::Conversion { key, source })?
        } else {
            return Err(BlackboardError::TypeMismatch {
                key,
                expected: data.info.type_name(),
                found: std::any::type_name::<T>(),
            });
        };
        data.value = Some(stored);
        data.sequence_id += 1;
        data.stamp = Some(Instant::now());
        Ok(())
    }

    fn read<T: PortValue>(&self, key: Symbol) -> Result<T, BlackboardError> {
        let data = self.data.lock();
        let value = data
            .value
            .as_ref()
            .ok_or(BlackboardError::MissingEntry(key))?;
        if let Some(value) = (**value).downcast_ref::<T>() {
            return Ok(value.clone());
        }
        let text = match (**value).downcast_ref::<String>() {
            Some(text) => Some(text.clone()),
            None if TypeInfo::of::<T>().is_string() => data.info.stringify(&**value),
            None => None,
        };
        match text {
            Some(text) => T::from_port_str(&text)
                .map_err(|source| BlackboardError::Conversion { key, source }),
            None => Err(BlackboardError::TypeMismatch {
                key,
                expected: data.info.type_name(),
                found: std::any::type_name::<T>(),
            }),
        }
    }

    fn update<T: PortValue, R>(
        &self,
        key: Symbol,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, BlackboardError> {
        let mut data = self.data.lock();
        let current = data
            .value
            .as_ref()
            .ok_or(BlackboardError::MissingEntry(key))?;
        let mut value = if let Some(value) = (**current).downcast_ref::<T>() {
            value.clone()
        } else if let (false, Some(text)) =
            (data.port_locked, (**current).downcast_ref::<String>())
        {
            T::from_port_str(text).map_err(|source| BlackboardError::Conversion { key, source })?
        } else {
            return Err(BlackboardError::TypeMismatch {
                key,
                expected: data.info.type_name(),
                found: std::any::type_name::<T>(),
            });
        };
        let result = f(&mut value);
        data.info = TypeInfo::of::<T>();
        data.value = Some(Arc::new(value));
        data.sequence_id += 1;
        data.stamp = Some(Instant::now());
        Ok(result)
    }

    fn info(&self) -> EntryInfo {
        let data = self.data.lock();
        EntryInfo {
            type_info: data.info,
            sequence_id: data.sequence_id,
            stamp: data.stamp,
            has_value: data.value.is_some(),
        }
    }
}

pub struct Blackboard {
    parent: Option<Arc<Blackboard>>,
    storage: Mutex<HashMap<Symbol, Arc<Entry>>>,
    internal_to_external: Mutex<HashMap<Symbol, Symbol>>,
    auto_remapping: AtomicBool,
}

impl Blackboard {
    pub fn create(parent: Option<Arc<Blackboard>>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            storage: Mutex::new(HashMap::new()),
            internal_to_external: Mutex::new(HashMap::new()),
            auto_remapping: AtomicBool::new(false),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Blackboard>> {
        self.parent.as_ref()
    }

    pub fn root(self: &Arc<Self>) -> Arc<Blackboard> {
        let mut bb = self;
        while let Some(parent) = &bb.parent {
            bb = parent;
        }
        bb.clone()
    }

    fn root_ref(&self) -> &Blackboard {
        let mut bb = self;
        while let Some(parent) = &bb.parent {
            bb = parent;
        }
        bb
    }

    /// Links `internal` in this blackboard to `external` in the parent.
    pub fn add_remapping(&self, internal: impl Into<Symbol>, external: impl Into<Symbol>) {
        let (internal, external) = (internal.into(), external.into());
        debug!("remapping {} to parent key {}", internal, external);
        self.internal_to_external.lock().insert(internal, external);
    }

    /// When enabled, keys unknown here (and not starting with `_`) resolve in the parent.
    pub fn enable_auto_remapping(&self, enable: bool) {
        self.auto_remapping.store(enable, Ordering::Relaxed);
    }

    fn remapped(&self, key: Symbol) -> Option<Symbol> {
        self.internal_to_external.lock().get(&key).copied()
    }

    fn auto_remapping(&self) -> bool {
        self.auto_remapping.load(Ordering::Relaxed)
    }

    pub(crate) fn get_entry(&self, key: Symbol) -> Option<Arc<Entry>> {
        if key.is_global() {
            return self.root_ref().get_entry(key.strip_global());
        }
        let local = self.storage.lock().get(&key).cloned();
        if local.is_some() {
            return local;
        }
        let parent = self.parent.as_ref()?;
        if let Some(external) = self.remapped(key) {
            return parent.get_entry(external);
        }
        if self.auto_remapping() && !key.is_private() {
            return parent.get_entry(key);
        }
        None
    }

    fn entry_or_create(
        &self,
        key: Symbol,
        info: TypeInfo,
        lock_type: bool,
    ) -> Result<Arc<Entry>, BlackboardError> {
        if key.is_global() {
            return self
                .root_ref()
                .entry_or_create(key.strip_global(), info, lock_type);
        }
        let existing = self.storage.lock().get(&key).cloned();
        if let Some(entry) = existing {
            if lock_type {
                entry.lock_type(key, info)?;
            }
            return Ok(entry);
        }
        if let Some(parent) = &self.parent {
            if let Some(external) = self.remapped(key) {
                return parent.entry_or_create(external, info, lock_type);
            }
            if self.auto_remapping() && !key.is_private() {
                return parent.entry_or_create(key, info, lock_type);
            }
        }
        let entry = self
            .storage
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Entry::new(info, lock_type)))
            .clone();
        if lock_type {
            entry.lock_type(key, info)?;
        }
        Ok(entry)
    }

    /// Declares `key` with the given type, locking it for later writes.
    /// Declaring an existing key with a different type is a `TypeMismatch`.
    pub fn create_entry(
        &self,
        key: impl Into<Symbol>,
        info: TypeInfo,
    ) -> Result<(), BlackboardError> {
        self.entry_or_create(key.into(), info, true).map(|_| ())
    }

    pub fn set<T: PortValue>(
        &self,
        key: impl Into<Symbol>,
        value: T,
    ) -> Result<(), BlackboardError> {
        let key = key.into();
        self.entry_or_create(key, TypeInfo::of::<T>(), false)?
            .write(key, value)
    }

    pub fn get<T: PortValue>(&self, key: impl Into<Symbol>) -> Result<T, BlackboardError> {
        let key = key.into();
        self.get_entry(key)
            .ok_or(BlackboardError::MissingEntry(key))?
            .read(key)
    }

    /// Returns `true` if `key` resolves to an entry holding a value.
    /// Modifies the value of `key` in place, holding the entry's lock for the
    /// whole read-modify-write. Counts as a write.
    pub fn update<T: PortValue, R>(
        &self,
        key: impl Into<Symbol>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, BlackboardError> {
        let key = key.into();
        self.get_entry(key)
            .ok_or(BlackboardError::MissingEntry(key))?
            .update(key, f)
    }

    pub fn contains(&self, key: impl Into<Symbol>) -> bool {
        self.get_entry(key.into())
            .map(|entry| entry.info().has_value)
            .unwrap_or(false)
    }

    pub fn entry_info(&self, key: impl Into<Symbol>) -> Option<EntryInfo> {
        self.get_entry(key.into()).map(|entry| entry.info())
    }

    pub fn sequence_id(&self, key: impl Into<Symbol>) -> Option<u64> {
        self.entry_info(key).map(|info| info.sequence_id)
    }

    /// Keys stored locally, sorted.
    pub fn keys(&self) -> Vec<Symbol> {
        let mut keys: Vec<_> = self.storage.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Removes a local entry. Returns `false` if there was none.
    pub fn unset(&self, key: impl Into<Symbol>) -> bool {
        let key = key.into();
        if key.is_global() {
            return self.root_ref().unset(key.strip_global());
        }
        self.storage.lock().remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.storage.lock().clear();
    }

    /// Dumps entries and remappings through `tracing` at debug level.
    pub fn debug_message(&self) {
        let entries: Vec<_> = self
            .storage
            .lock()
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();
        for (key, entry) in entries {
            let info = entry.info();
            debug!(
                key = %key,
                type_name = info.type_info.type_name(),
                sequence_id = info.sequence_id,
                has_value = info.has_value,
                "blackboard entry"
            );
        }
        for (internal, external) in self.internal_to_external.lock().iter() {
            debug!("[{}] remapped to parent [{}]", internal, external);
        }
    }
}

impl Debug for Blackboard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blackboard")
            .field("keys", &self.keys())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
