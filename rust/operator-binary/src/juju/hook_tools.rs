//! [`Model`] backed by the agent's hook tools.

use std::{collections::BTreeMap, process::Stdio};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use tokio::{io::AsyncWriteExt, process::Command};

use super::{Databag, Member, Model, RelationId, RelationIdError, UnitStatus};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to run hook tool {tool}"))]
    RunHookTool {
        source: std::io::Error,
        tool: &'static str,
    },

    #[snafu(display("failed to write stdin of hook tool {tool}"))]
    WriteHookToolInput {
        source: std::io::Error,
        tool: &'static str,
    },

    #[snafu(display("hook tool {tool} exited with code {code:?}: {stderr}"))]
    HookToolFailed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("failed to parse output of hook tool {tool}"))]
    ParseHookToolOutput {
        source: serde_json::Error,
        tool: &'static str,
    },

    #[snafu(display("hook tool {tool} returned an invalid relation id"))]
    ParseRelationId {
        source: RelationIdError,
        tool: &'static str,
    },

    #[snafu(display("failed to serialize relation data"))]
    SerializeRelationData { source: serde_yaml::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct HookTools {
    app_name: String,
    unit_name: String,
    model_name: String,
    model_uuid: String,
}

impl HookTools {
    pub fn new(unit_name: &str, model_name: &str, model_uuid: &str) -> Self {
        let app_name = unit_name
            .split_once('/')
            .map_or(unit_name, |(app, _)| app)
            .to_string();
        Self {
            app_name,
            unit_name: unit_name.to_string(),
            model_name: model_name.to_string(),
            model_uuid: model_uuid.to_string(),
        }
    }

    async fn run(
        &self,
        tool: &'static str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        tracing::trace!(tool, ?args, "running hook tool");
        let mut child = Command::new(tool)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(RunHookToolSnafu { tool })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .context(WriteHookToolInputSnafu { tool })?;
        }
        let output = child
            .wait_with_output()
            .await
            .context(RunHookToolSnafu { tool })?;
        if !output.status.success() {
            return HookToolFailedSnafu {
                tool,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail();
        }
        Ok(output.stdout)
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        tool: &'static str,
        args: &[String],
    ) -> Result<T> {
        let mut args = args.to_vec();
        args.push("--format=json".to_string());
        let stdout = self.run(tool, &args, None).await?;
        serde_json::from_slice(&stdout).context(ParseHookToolOutputSnafu { tool })
    }
}

fn relation_get_args(relation: &RelationId, member: &Member) -> Vec<String> {
    let mut args = vec!["-r".to_string(), relation.to_string()];
    if let Member::App(_) = member {
        args.push("--app".to_string());
    }
    args.push("-".to_string());
    args.push(member.name().to_string());
    args
}

fn relation_set_args(relation: &RelationId, app_scope: bool) -> Vec<String> {
    let mut args = vec!["-r".to_string(), relation.to_string()];
    if app_scope {
        args.push("--app".to_string());
    }
    args.extend(["--file".to_string(), "-".to_string()]);
    args
}

fn status_set_args(status: &UnitStatus) -> Vec<String> {
    vec![status.to_string(), status.message().to_string()]
}

#[async_trait]
impl Model for HookTools {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn unit_name(&self) -> &str {
        &self.unit_name
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    async fn is_leader(&self) -> Result<bool> {
        self.run_json("is-leader", &[]).await
    }

    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>> {
        let ids: Vec<String> = self
            .run_json("relation-ids", &[endpoint.to_string()])
            .await?;
        ids.iter()
            .map(|id| id.parse::<RelationId>())
            .collect::<Result<_, _>>()
            .context(ParseRelationIdSnafu {
                tool: "relation-ids",
            })
    }

    async fn relation_units(&self, relation: &RelationId) -> Result<Vec<String>> {
        self.run_json("relation-list", &["-r".to_string(), relation.to_string()])
            .await
    }

    async fn relation_remote_app(&self, relation: &RelationId) -> Result<Option<String>> {
        let app: Option<String> = self
            .run_json(
                "relation-list",
                &["-r".to_string(), relation.to_string(), "--app".to_string()],
            )
            .await?;
        Ok(app.filter(|app| !app.is_empty()))
    }

    async fn relation_get(&self, relation: &RelationId, member: &Member) -> Result<Databag> {
        let data: Option<Databag> = self
            .run_json("relation-get", &relation_get_args(relation, member))
            .await?;
        Ok(data.unwrap_or_default())
    }

    async fn relation_set(
        &self,
        relation: &RelationId,
        app_scope: bool,
        data: &Databag,
    ) -> Result<()> {
        let payload = serde_yaml::to_string(data).context(SerializeRelationDataSnafu)?;
        self.run(
            "relation-set",
            &relation_set_args(relation, app_scope),
            Some(payload.as_bytes()),
        )
        .await
        .map(drop)
    }

    async fn config(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let config: Option<serde_json::Map<String, serde_json::Value>> =
            self.run_json("config-get", &[]).await?;
        Ok(config.unwrap_or_default())
    }

    async fn secret_get(&self, id: &str) -> Result<Databag> {
        self.run_json("secret-get", &[id.to_string()]).await
    }

    async fn status_set(&self, status: &UnitStatus) -> Result<()> {
        self.run("status-set", &status_set_args(status), None)
            .await
            .map(drop)
    }

    async fn application_version_set(&self, version: &str) -> Result<()> {
        self.run("application-version-set", &[version.to_string()], None)
            .await
            .map(drop)
    }

    async fn open_port(&self, protocol: &str, port: u16) -> Result<()> {
        self.run("open-port", &[format!("{port}/{protocol}")], None)
            .await
            .map(drop)
    }

    async fn state_get(&self, key: &str) -> Result<Option<String>> {
        let mut state: Option<BTreeMap<String, String>> = self.run_json("state-get", &[]).await?;
        Ok(state.as_mut().and_then(|state| state.remove(key)))
    }

    async fn state_set(&self, key: &str, value: &str) -> Result<()> {
        let payload = serde_yaml::to_string(&BTreeMap::from([(key, value)]))
            .context(SerializeRelationDataSnafu)?;
        self.run(
            "state-set",
            &["--file".to_string(), "-".to_string()],
            Some(payload.as_bytes()),
        )
        .await
        .map(drop)
    }

    async fn action_get(&self) -> Result<serde_json::Value> {
        self.run_json("action-get", &[]).await
    }

    async fn action_set(&self, results: &Databag) -> Result<()> {
        let args = results
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();
        self.run("action-set", &args, None).await.map(drop)
    }

    async fn action_fail(&self, message: &str) -> Result<()> {
        self.run("action-fail", &[message.to_string()], None)
            .await
            .map(drop)
    }

    async fn action_log(&self, message: &str) -> Result<()> {
        self.run("action-log", &[message.to_string()], None)
            .await
            .map(drop)
    }
}
