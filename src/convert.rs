//! String conversions for values flowing through ports and the blackboard.

use crate::{error::ConvertError, NodeStatus};
use std::{
    any::{Any, TypeId},
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// A type-erased value stored in a blackboard entry.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// A value that can be stored in the blackboard and read or written through ports.
///
/// `from_port_str` is used for literal port bindings and for entries that were
/// written as plain strings; types without a textual form can keep the default,
/// which always fails. Custom types only need an empty impl:
///
/// ```rust
/// # use behavior_tree_core::PortValue;
/// #[derive(Clone)]
/// struct Pose { x: f64, y: f64 }
/// impl PortValue for Pose {}
/// ```
pub trait PortValue: Clone + Send + Sync + 'static {
    fn from_port_str(s: &str) -> Result<Self, ConvertError> {
        let _ = s;
        Err(ConvertError::Unsupported(std::any::type_name::<Self>()))
    }

    fn to_port_string(&self) -> Option<String> {
        None
    }
}

macro_rules! impl_parsed_value {
    ($($t:ty),*) => {
        $(
            impl PortValue for $t {
                fn from_port_str(s: &str) -> Result<Self, ConvertError> {
                    s.trim().parse().map_err(|_| ConvertError::Parse {
                        input: s.to_owned(),
                        type_name: stringify!($t),
                    })
                }

                fn to_port_string(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

impl_parsed_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char);

impl PortValue for bool {
    fn from_port_str(s: &str) -> Result<Self, ConvertError> {
        match s.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            s if s.eq_ignore_ascii_case("true") => Ok(true),
            s if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(ConvertError::Parse {
                input: s.to_owned(),
                type_name: "bool",
            }),
        }
    }

    fn to_port_string(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl PortValue for String {
    fn from_port_str(s: &str) -> Result<Self, ConvertError> {
        Ok(s.to_owned())
    }

    fn to_port_string(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// Lists are written as `;`-separated items, e.g. `"1;2;3"`.
impl<T: PortValue> PortValue for Vec<T> {
    fn from_port_str(s: &str) -> Result<Self, ConvertError> {
        if s.trim().is_empty() {
            return Ok(vec![]);
        }
        s.split(';').map(T::from_port_str).collect()
    }

    fn to_port_string(&self) -> Option<String> {
        let items = self
            .iter()
            .map(PortValue::to_port_string)
            .collect::<Option<Vec<_>>>()?;
        Some(items.join(";"))
    }
}

impl PortValue for NodeStatus {
    fn from_port_str(s: &str) -> Result<Self, ConvertError> {
        let s = s.trim();
        [
            NodeStatus::Idle,
            NodeStatus::Running,
            NodeStatus::Success,
            NodeStatus::Failure,
            NodeStatus::Skipped,
        ]
        .into_iter()
        .find(|status| status.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ConvertError::Parse {
            input: s.to_owned(),
            type_name: "NodeStatus",
        })
    }

    fn to_port_string(&self) -> Option<String> {
        Some(self.as_str().to_owned())
    }
}

/// Runtime type tag of a port or blackboard entry, carrying the conversions
/// of the concrete type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    type_id: TypeId,
    type_name: &'static str,
    parse: fn(&str) -> Result<AnyValue, ConvertError>,
    stringify: fn(&(dyn Any + Send + Sync)) -> Option<String>,
}

fn parse_any<T: PortValue>(s: &str) -> Result<AnyValue, ConvertError> {
    T::from_port_str(s).map(|v| Arc::new(v) as AnyValue)
}

fn stringify_any<T: PortValue>(value: &(dyn Any + Send + Sync)) -> Option<String> {
    value.downcast_ref::<T>().and_then(PortValue::to_port_string)
}

impl TypeInfo {
    pub fn of<T: PortValue>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            parse: parse_any::<T>,
            stringify: stringify_any::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn is_string(&self) -> bool {
        self.is::<String>()
    }

    /// Converts the textual form into a value of this type.
    pub fn parse(&self, s: &str) -> Result<AnyValue, ConvertError> {
        (self.parse)(s)
    }

    /// Textual form of a value of this type, if it has one.
    pub fn stringify(&self, value: &(dyn Any + Send + Sync)) -> Option<String> {
        (self.stringify)(value)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeInfo {}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Equality used by `Switch` and `BlackboardCheck`: exact text first, then
/// integers, then floats within `f32::EPSILON`.
pub fn loosely_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    if let (Ok(a), Ok(b)) = (a.parse::<i64>(), b.parse::<i64>()) {
        return a == b;
    }
    if let (Ok(a), Ok(b)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return (a - b).abs() < f32::EPSILON as f64;
    }
    false
}
