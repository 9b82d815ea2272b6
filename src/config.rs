//! Per-node configuration and driver options, loadable from YAML.
//!
//! ```yaml
//! ports:
//!   num_attempts: 3
//!   target: "{goal}"
//! ```

use std::{collections::HashMap, sync::Arc};

use serde::{de::Error as _, Deserialize, Deserializer};

use crate::{error::ConfigError, Blackboard};

/// The `config` argument of the construction API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Port name to binding: `{key}`, `{@key}`, `{=}` or a literal.
    #[serde(deserialize_with = "scalar_map")]
    pub ports: HashMap<String, String>,
    /// Blackboard of the node; the tree's own blackboard when `None`.
    #[serde(skip)]
    pub blackboard: Option<Arc<Blackboard>>,
}

fn scalar_map<'de, D: Deserializer<'de>>(de: D) -> Result<HashMap<String, String>, D::Error> {
    use serde_yaml::Value;
    HashMap::<String, Value>::deserialize(de)?
        .into_iter()
        .map(|(port, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(D::Error::custom(format!(
                        "port {} must be bound to a scalar, got {:?}",
                        port, other
                    )))
                }
            };
            Ok((port, text))
        })
        .collect()
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: impl Into<String>, binding: impl Into<String>) -> Self {
        self.ports.insert(port.into(), binding.into());
        self
    }

    pub fn with_blackboard(mut self, blackboard: Arc<Blackboard>) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }
}

impl From<HashMap<String, String>> for NodeConfig {
    fn from(ports: HashMap<String, String>) -> Self {
        Self {
            ports,
            blackboard: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOption {
    /// One tick, wake-up signals are ignored.
    ExactlyOnce,
    /// One tick, repeated while a node emits a wake-up signal during it.
    OnceUnlessWokenUp,
    /// Tick until the root stops returning RUNNING.
    WhileRunning,
}

/// Driver pacing for [`crate::Tree::tick_with`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickOptions {
    pub mode: TickOption,
    /// Longest wait between two ticks while RUNNING; a wake-up signal cuts it short.
    pub sleep_ms: u64,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            mode: TickOption::WhileRunning,
            sleep_ms: 10,
        }
    }
}

impl TickOptions {
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }
}
