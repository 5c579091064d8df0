//! Plan model: the fully-parsed desired-state document.
//!
//! A [`Plan`] is hosts plus tasks; a [`Task`] is an ordered list of
//! [`Action`]s targeting named hosts. These are passive data structures:
//! both the DSL parser and the TOML loader produce them, and everything
//! downstream (runner, state store) consumes them without caring which
//! front end they came from.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Action configuration: string keys to arbitrary JSON-shaped values.
pub type ActionData = serde_json::Map<String, Value>;

/// Key under which an action's resource identity is injected into its data.
pub const RESOURCE_ID_KEY: &str = "_resource_id";

/// Key under which the loader records the plan file's directory, so
/// operations can resolve relative template paths.
pub const PLAN_DIR_KEY: &str = "_plan_dir";

/// How the engine reaches a host.
///
/// Only `local` is implemented; `agent` and `server` are recognized so that
/// plans naming them fail at execution time with a descriptive error rather
/// than at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    /// Direct execution on the machine running the engine.
    #[default]
    Local,
    /// Daemon/agent mediated execution (placeholder).
    Agent,
    /// Server mediated orchestration (placeholder).
    Server,
}

impl Connection {
    /// Returns the wire name of this connection mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Connection::Local => "local",
            Connection::Agent => "agent",
            Connection::Server => "server",
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Connection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Connection::Local),
            "agent" => Ok(Connection::Agent),
            "server" => Ok(Connection::Server),
            other => Err(Error::Config(format!(
                "unknown connection type '{other}' (expected local, agent or server)"
            ))),
        }
    }
}

/// One target machine, created once per plan load and immutable during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Unique host name, the key in [`Plan::hosts`].
    pub name: String,
    /// Connection mode used to reach this host.
    #[serde(default)]
    pub connection: Connection,
    /// Optional network address; unused for local connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Free-form variables available to operations (templating, context).
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl Host {
    /// Creates a local host with no address or variables.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: Connection::Local,
            address: None,
            variables: HashMap::new(),
        }
    }
}

/// One declared unit of desired state.
///
/// `on_success` and `on_failure` hold nested actions of the same shape,
/// executed conditionally after the parent completes. The structure is a
/// tree by construction; dependency edges (`depends_on`) only ever refer to
/// sibling identities within the same action list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    /// Operation kind, resolved against the registry at execution time.
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation configuration.
    #[serde(default)]
    pub data: ActionData,
    /// Resource identities this action depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Actions executed after this one succeeds with changes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<Action>,
    /// Actions executed after this one fails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<Action>,
}

impl Action {
    /// Creates an action of the given kind with empty configuration.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// The action's identity for dependency and reconciliation purposes:
    /// `{kind}.{name-like}` when a name-like field is present, otherwise the
    /// positional fallback `{kind}.__{index}`.
    pub fn resource_id(&self, index: usize) -> String {
        for key in ["name", "path"] {
            if let Some(Value::String(v)) = self.data.get(key) {
                if !v.is_empty() {
                    return format!("{}.{}", self.kind, v);
                }
            }
        }
        format!("{}.__{}", self.kind, index)
    }
}

/// A named group of actions aimed at an ordered list of hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task name, for display only.
    pub name: String,
    /// Target host names, looked up in [`Plan::hosts`] at execution time.
    pub hosts: Vec<String>,
    /// Top-level actions, in declaration order.
    pub actions: Vec<Action>,
}

/// The fully-parsed desired-state document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Declared hosts, keyed by name. Insertion order is kept so runs are
    /// deterministic, but carries no meaning.
    pub hosts: IndexMap<String, Host>,
    /// Tasks in declaration order.
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a host by name.
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }
}
