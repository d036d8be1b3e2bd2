//! Adapters for the orchestration agent (hook tools) and the workload container (Pebble).
//!
//! Everything the charm observes or mutates goes through the [`Model`] and [`Container`]
//! traits, so the reconciliation logic can be driven by in-memory doubles in tests.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};

pub mod departed;
pub mod event;
pub mod hook_tools;
pub mod layer;
pub mod pebble;

pub use departed::WithoutRelation;
pub use event::{DeferredEvents, HookEvent, RelationEventKind};
pub use layer::Layer;

/// Key/value data bag of one side of a relation.
pub type Databag = BTreeMap<String, String>;

#[derive(Snafu, Debug)]
pub enum RelationIdError {
    #[snafu(display("relation id {id:?} is not of the form <endpoint>:<number>"))]
    Malformed { id: String },

    #[snafu(display("relation id {id:?} has a non-numeric suffix"))]
    NonNumeric {
        source: std::num::ParseIntError,
        id: String,
    },
}

/// Identifies one established relation, rendered by the agent as `<endpoint>:<id>`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationId {
    pub endpoint: String,
    pub id: u32,
}

impl RelationId {
    pub fn new(endpoint: impl Into<String>, id: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            id,
        }
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.id)
    }
}

impl FromStr for RelationId {
    type Err = RelationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (endpoint, id) = s.rsplit_once(':').context(MalformedSnafu { id: s })?;
        if endpoint.is_empty() {
            return MalformedSnafu { id: s }.fail();
        }
        Ok(Self {
            endpoint: endpoint.to_string(),
            id: id.parse().context(NonNumericSnafu { id: s })?,
        })
    }
}

impl TryFrom<String> for RelationId {
    type Error = RelationIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelationId> for String {
    fn from(value: RelationId) -> Self {
        value.to_string()
    }
}

/// Whose data bag to read on a relation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Member {
    Unit(String),
    App(String),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Unit(name) | Member::App(name) => name,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Maintenance(String),
    Waiting(String),
    Blocked(String),
}

impl UnitStatus {
    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active => "",
            UnitStatus::Maintenance(message)
            | UnitStatus::Waiting(message)
            | UnitStatus::Blocked(message) => message,
        }
    }
}

/// The unit's view of the agent.
#[async_trait]
pub trait Model: Send + Sync {
    fn app_name(&self) -> &str;
    fn unit_name(&self) -> &str;
    fn model_name(&self) -> &str;
    fn model_uuid(&self) -> &str;

    async fn is_leader(&self) -> Result<bool, hook_tools::Error>;
    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>, hook_tools::Error>;
    async fn relation_units(&self, relation: &RelationId)
        -> Result<Vec<String>, hook_tools::Error>;
    async fn relation_remote_app(
        &self,
        relation: &RelationId,
    ) -> Result<Option<String>, hook_tools::Error>;
    async fn relation_get(
        &self,
        relation: &RelationId,
        member: &Member,
    ) -> Result<Databag, hook_tools::Error>;
    /// Writes `data` into this unit's (or, with `app_scope`, this application's) bag.
    /// Empty values delete their key.
    async fn relation_set(
        &self,
        relation: &RelationId,
        app_scope: bool,
        data: &Databag,
    ) -> Result<(), hook_tools::Error>;
    async fn config(&self) -> Result<serde_json::Map<String, serde_json::Value>, hook_tools::Error>;
    async fn secret_get(&self, id: &str) -> Result<Databag, hook_tools::Error>;
    async fn status_set(&self, status: &UnitStatus) -> Result<(), hook_tools::Error>;
    async fn application_version_set(&self, version: &str) -> Result<(), hook_tools::Error>;
    async fn open_port(&self, protocol: &str, port: u16) -> Result<(), hook_tools::Error>;
    async fn state_get(&self, key: &str) -> Result<Option<String>, hook_tools::Error>;
    async fn state_set(&self, key: &str, value: &str) -> Result<(), hook_tools::Error>;
    async fn action_get(&self) -> Result<serde_json::Value, hook_tools::Error>;
    async fn action_set(&self, results: &Databag) -> Result<(), hook_tools::Error>;
    async fn action_fail(&self, message: &str) -> Result<(), hook_tools::Error>;
    async fn action_log(&self, message: &str) -> Result<(), hook_tools::Error>;
}

/// Options for running a command inside the workload container.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecOptions {
    /// Inherit environment, user and working directory of this Pebble service.
    pub service_context: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub timeout: Duration,
    pub stdin: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            service_context: None,
            environment: BTreeMap::new(),
            timeout: Duration::from_secs(20),
            stdin: None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The workload container, as reachable through its Pebble socket.
#[async_trait]
pub trait Container: Send + Sync {
    async fn can_connect(&self) -> bool;
    async fn is_dir(&self, path: &str) -> Result<bool, pebble::Error>;
    async fn make_dir(&self, path: &str, make_parents: bool) -> Result<(), pebble::Error>;
    async fn push(&self, path: &str, content: &[u8], make_dirs: bool)
        -> Result<(), pebble::Error>;
    async fn remove_path(&self, path: &str) -> Result<(), pebble::Error>;
    async fn add_layer(&self, label: &str, layer: &Layer, combine: bool)
        -> Result<(), pebble::Error>;
    async fn replan(&self) -> Result<(), pebble::Error>;
    async fn service_is_running(&self, service: &str) -> Result<bool, pebble::Error>;
    async fn exec(
        &self,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, pebble::ExecError>;
}
