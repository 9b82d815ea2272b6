//! Interned strings used as blackboard keys and port names.
//!
//! Equal strings always intern to the same `&'static str`, so equality
//! and hashing only look at the address.

use ::once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::ops::Deref;

static SYMBOL_HEAP: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// An interned string with O(1) equality.
#[derive(Clone, Copy, Eq)]
pub struct Symbol {
    s: &'static str,
}

impl Symbol {
    /// Retrieves the address of the backing string.
    pub fn addr(self) -> usize {
        self.s.as_ptr() as usize
    }

    /// Retrieves the string from the Symbol.
    pub fn as_str(self) -> &'static str {
        self.s
    }

    /// Keys starting with `@` are resolved in the root blackboard.
    pub fn is_global(self) -> bool {
        self.s.starts_with('@')
    }

    /// Keys starting with `_` are never auto-remapped to a parent blackboard.
    pub fn is_private(self) -> bool {
        self.s.starts_with('_')
    }

    /// The key with a leading `@` stripped, if any.
    pub fn strip_global(self) -> Symbol {
        match self.s.strip_prefix('@') {
            Some(stripped) => Symbol::from(stripped),
            None => self,
        }
    }
}

impl Debug for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Debug::fmt(self.s, fmt)
    }
}

impl Deref for Symbol {
    type Target = str;
    fn deref(&self) -> &str {
        self.s
    }
}

impl Display for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.write_str(self.s)
    }
}

impl<S: AsRef<str>> From<S> for Symbol {
    fn from(s: S) -> Symbol {
        let s = s.as_ref();
        let mut heap = SYMBOL_HEAP.lock();
        if let Some(interned) = heap.get(s) {
            return Symbol { s: interned };
        }
        let interned: &'static str = Box::leak(s.to_owned().into_boxed_str());
        heap.insert(interned);
        Symbol { s: interned }
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.s.cmp(other.s)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.s == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.s == *other
    }
}

impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Symbol, D::Error> {
        String::deserialize(de).map(Symbol::from)
    }
}

impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.s)
    }
}
