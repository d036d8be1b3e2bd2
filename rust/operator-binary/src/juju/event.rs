//! The dispatched hook, and the queue of hooks deferred by earlier dispatches.

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::{hook_tools, Model, RelationId};

/// Unit state key holding the JSON-encoded deferred events.
pub const DEFERRED_EVENTS_KEY: &str = "deferred-events";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to serialize deferred events"))]
    SerializeDeferredEvents { source: serde_json::Error },

    #[snafu(display("failed to persist deferred events"))]
    StoreDeferredEvents { source: hook_tools::Error },
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RelationEventKind {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HookEvent {
    Install,
    Start,
    ConfigChanged,
    UpgradeCharm,
    LeaderElected,
    UpdateStatus,
    PebbleReady {
        container: String,
    },
    Relation {
        kind: RelationEventKind,
        relation: RelationId,
        #[serde(default)]
        remote_app: Option<String>,
        #[serde(default)]
        remote_unit: Option<String>,
    },
    Action {
        name: String,
    },
    Other {
        hook: String,
    },
}

/// What the agent tells the charm about the current dispatch, through `JUJU_*` variables.
#[derive(Clone, Debug, Default)]
pub struct DispatchContext {
    pub dispatch_path: String,
    pub action_name: Option<String>,
    pub relation_id: Option<String>,
    pub remote_app: Option<String>,
    pub remote_unit: Option<String>,
    pub workload_name: Option<String>,
}

impl HookEvent {
    pub fn from_dispatch(context: &DispatchContext) -> Self {
        if let Some(name) = context
            .dispatch_path
            .strip_prefix("actions/")
            .map(str::to_string)
            .or_else(|| context.action_name.clone())
        {
            return HookEvent::Action { name };
        }

        let hook = context
            .dispatch_path
            .strip_prefix("hooks/")
            .unwrap_or(&context.dispatch_path);
        match hook {
            "install" => return HookEvent::Install,
            "start" => return HookEvent::Start,
            "config-changed" => return HookEvent::ConfigChanged,
            "upgrade-charm" => return HookEvent::UpgradeCharm,
            "leader-elected" => return HookEvent::LeaderElected,
            "update-status" => return HookEvent::UpdateStatus,
            _ => {}
        }

        if let Some(container) = hook.strip_suffix("-pebble-ready") {
            return HookEvent::PebbleReady {
                container: context
                    .workload_name
                    .clone()
                    .unwrap_or_else(|| container.to_string()),
            };
        }

        if let Some(event) = Self::relation_event(hook, context) {
            return event;
        }

        HookEvent::Other {
            hook: hook.to_string(),
        }
    }

    fn relation_event(hook: &str, context: &DispatchContext) -> Option<Self> {
        let (_, kind) = hook.rsplit_once("-relation-")?;
        let kind = kind.parse().ok()?;
        let raw_id = context.relation_id.as_deref()?;
        let relation = match raw_id.parse() {
            Ok(relation) => relation,
            Err(error) => {
                tracing::warn!(
                    hook,
                    error = &error as &dyn std::error::Error,
                    "ignoring relation hook with malformed relation id"
                );
                return None;
            }
        };
        Some(HookEvent::Relation {
            kind,
            relation,
            remote_app: context.remote_app.clone(),
            remote_unit: context.remote_unit.clone(),
        })
    }

    /// The hook name this event was dispatched as.
    pub fn name(&self) -> String {
        match self {
            HookEvent::Install => "install".to_string(),
            HookEvent::Start => "start".to_string(),
            HookEvent::ConfigChanged => "config-changed".to_string(),
            HookEvent::UpgradeCharm => "upgrade-charm".to_string(),
            HookEvent::LeaderElected => "leader-elected".to_string(),
            HookEvent::UpdateStatus => "update-status".to_string(),
            HookEvent::PebbleReady { container } => format!("{container}-pebble-ready"),
            HookEvent::Relation { kind, relation, .. } => {
                format!("{}-relation-{kind}", relation.endpoint)
            }
            HookEvent::Action { name } => format!("{name}-action"),
            HookEvent::Other { hook } => hook.clone(),
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self, HookEvent::Action { .. })
    }
}

/// Events re-queued by earlier dispatches, persisted in unit state between hook invocations.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    pending: Vec<HookEvent>,
    /// What unit state holds, `None` when it could not be parsed.
    persisted: Option<Vec<HookEvent>>,
}

impl DeferredEvents {
    /// Reads the queue from unit state. An unreadable queue is dropped rather than failing the
    /// dispatch.
    pub async fn load(model: &dyn Model) -> Self {
        let raw = match model.state_get(DEFERRED_EVENTS_KEY).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to read deferred events, starting with an empty queue"
                );
                None
            }
        };
        let persisted = match raw.as_deref().filter(|raw| !raw.is_empty()) {
            Some(raw) => match serde_json::from_str::<Vec<HookEvent>>(raw) {
                Ok(events) => Some(events),
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "discarding unparsable deferred events"
                    );
                    None
                }
            },
            None => Some(Vec::new()),
        };
        Self {
            pending: persisted.clone().unwrap_or_default(),
            persisted,
        }
    }

    /// Removes and returns everything queued so far, oldest first.
    pub fn take(&mut self) -> Vec<HookEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Queues `event` for re-delivery on the next dispatch. Actions cannot be deferred and
    /// an event already queued is not queued twice.
    pub fn push(&mut self, event: HookEvent) {
        if event.is_action() {
            tracing::warn!(event = event.name(), "actions cannot be deferred");
            return;
        }
        if !self.pending.contains(&event) {
            tracing::debug!(event = event.name(), "deferring event");
            self.pending.push(event);
        }
    }

    /// Writes the queue back to unit state, skipping the hook tool when nothing changed.
    pub async fn store(&self, model: &dyn Model) -> Result<(), Error> {
        if self.persisted.as_ref() == Some(&self.pending) {
            return Ok(());
        }
        let raw = serde_json::to_string(&self.pending).context(SerializeDeferredEventsSnafu)?;
        model
            .state_set(DEFERRED_EVENTS_KEY, &raw)
            .await
            .context(StoreDeferredEventsSnafu)
    }
}
