use crate::{convert::TypeInfo, parser::parse_port_binding, PortValue, Symbol};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortDirection {
    Input,
    Output,
    InOut,
}

/// Declaration of a port a node reads from or writes to.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub direction: PortDirection,
    pub key: Symbol,
    pub type_info: TypeInfo,
    /// Binding used when the node configuration leaves the port unbound.
    /// Parsed with the same syntax as configured bindings.
    pub default: Option<String>,
    pub description: String,
}

impl PortSpec {
    fn new<T: PortValue>(direction: PortDirection, key: impl Into<Symbol>) -> Self {
        Self {
            direction,
            key: key.into(),
            type_info: TypeInfo::of::<T>(),
            default: None,
            description: String::new(),
        }
    }

    pub fn new_in<T: PortValue>(key: impl Into<Symbol>) -> Self {
        Self::new::<T>(PortDirection::Input, key)
    }

    pub fn new_out<T: PortValue>(key: impl Into<Symbol>) -> Self {
        Self::new::<T>(PortDirection::Output, key)
    }

    pub fn new_inout<T: PortValue>(key: impl Into<Symbol>) -> Self {
        Self::new::<T>(PortDirection::InOut, key)
    }

    pub fn with_default(mut self, default: impl ToString) -> Self {
        self.default = Some(default.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_input(&self) -> bool {
        matches!(self.direction, PortDirection::Input | PortDirection::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.direction, PortDirection::Output | PortDirection::InOut)
    }
}

/// Runtime value of a port: a literal fixed at build time or a blackboard key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortBinding {
    Literal(String),
    /// Key resolved through the node's blackboard and its remappings.
    Ref(Symbol),
    /// Key resolved in the root blackboard, bypassing remapping.
    Global(Symbol),
}

impl PortBinding {
    /// Parses `{key}`, `{@key}` and `{=}`; anything else is a literal.
    pub fn parse(port: impl Into<Symbol>, text: &str) -> Self {
        parse_port_binding(port.into(), text)
    }

    pub fn key(&self) -> Option<Symbol> {
        match self {
            Self::Literal(_) => None,
            Self::Ref(key) | Self::Global(key) => Some(*key),
        }
    }
}
