use crate::Symbol;
use thiserror::Error;

/// Failure to convert the textual form of a port value into a typed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("cannot parse {input:?} as {type_name}")]
    Parse {
        input: String,
        type_name: &'static str,
    },
    #[error("type {0} has no string conversion")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BlackboardError {
    #[error("blackboard entry {0:?} does not exist or was never set")]
    MissingEntry(Symbol),
    #[error("blackboard entry {key:?} is locked to type {expected}, got {found}")]
    TypeMismatch {
        key: Symbol,
        expected: &'static str,
        found: &'static str,
    },
    #[error("blackboard entry {key:?}: {source}")]
    Conversion {
        key: Symbol,
        #[source]
        source: ConvertError,
    },
}

/// Errors raised while ticking. A `Failure` status is an outcome, not one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BehaviorError {
    /// Structural misuse of the tree, e.g. a child returning `Idle`.
    #[error("logic error: {0}")]
    Logic(String),
    /// A node could not produce a valid value, e.g. a missing required port.
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

impl BehaviorError {
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

pub type Result<T, E = BehaviorError> = std::result::Result<T, E>;

/// Errors raised by the construction API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("attempted to add too many children to {0:?}")]
    TooManyChildren(String),
    #[error("node {0:?} already has a parent")]
    AlreadyHasParent(String),
    #[error("node {0:?} cannot have children")]
    NotAComposite(String),
    #[error("node id {0} does not exist in this tree")]
    UnknownNode(usize),
    #[error("unknown node kind {0:?}")]
    UnknownKind(String),
    #[error("node {node:?} has no port named {port:?}")]
    UnknownPort { node: String, port: String },
    #[error("literal {literal:?} bound to output port {port:?} of {node:?}")]
    LiteralOnOutput {
        node: String,
        port: String,
        literal: String,
    },
    #[error("invalid literal for port {port:?} of {node:?}: {source}")]
    InvalidLiteral {
        node: String,
        port: String,
        #[source]
        source: ConvertError,
    },
    #[error("adding {child:?} would create a cycle")]
    Cycle { child: String },
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type AddChildResult = Result<(), BuildError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid yaml: {0}")]
    Yaml(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}
