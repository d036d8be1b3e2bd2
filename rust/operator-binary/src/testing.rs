//! In-memory doubles of the agent and the workload container.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::juju::{
    hook_tools, pebble, Container, Databag, ExecOptions, ExecOutput, Layer, Member, Model,
    RelationId, UnitStatus,
};

pub const APP: &str = "identity-platform-admin-ui";
pub const UNIT: &str = "identity-platform-admin-ui/0";
pub const MODEL: &str = "testing";
pub const MODEL_UUID: &str = "4b1f0c6e-2a8d-4f3b-9e7c-5d0a1b2c3d4e";

/// Amazon Root CA 3.
pub const TEST_CA: &str = "-----BEGIN CERTIFICATE-----
MIIBtjCCAVugAwIBAgITBmyf1XSXNmY/Owua2eiedgPySjAKBggqhkjOPQQDAjA5
MQswCQYDVQQGEwJVUzEPMA0GA1UEChMGQW1hem9uMRkwFwYDVQQDExBBbWF6b24g
Um9vdCBDQSAzMB4XDTE1MDUyNjAwMDAwMFoXDTQwMDUyNjAwMDAwMFowOTELMAkG
A1UEBhMCVVMxDzANBgNVBAoTBkFtYXpvbjEZMBcGA1UEAxMQQW1hem9uIFJvb3Qg
Q0EgMzBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABCmXp8ZBf8ANm+gBG1bG8lKl
ui2yEujSLtf6ycXYqm0fc4E7O5hrOXwzpcVOho6AF2hiRVd9RFgdszflZwjrZt6j
QjBAMA8GA1UdEwEB/wQFMAMBAf8wDgYDVR0PAQH/BAQDAgGGMB0GA1UdDgQWBBSr
ttvXBp43rDCGB5Fwx5zEGbF4wDAKBggqhkjOPQQDAgNJADBGAiEA4IWSoxe3jfkr
BqWTrBqYaGFy+uGh0PsceGCmQ5nFuMQCIQCcAu/xlJyzlvnrxir4tiz+OpAUFteM
YyRIHN8wfdVoOw==
-----END CERTIFICATE-----
";

#[derive(Default)]
struct FakeRelation {
    remote_app: String,
    units: Vec<String>,
    bags: BTreeMap<String, Databag>,
}

#[derive(Default)]
struct ModelState {
    leader: bool,
    next_relation_id: u32,
    relations: BTreeMap<RelationId, FakeRelation>,
    config: Map<String, Value>,
    secrets: BTreeMap<String, Databag>,
    statuses: Vec<UnitStatus>,
    version: Option<String>,
    ports: Vec<(String, u16)>,
    state: BTreeMap<String, String>,
    action_params: Value,
    action_results: Databag,
    action_failure: Option<String>,
    action_logs: Vec<String>,
    relation_writes: Vec<(RelationId, Databag)>,
}

pub struct FakeModel {
    state: Mutex<ModelState>,
}

impl Default for FakeModel {
    fn default() -> Self {
        Self {
            state: Mutex::new(ModelState {
                action_params: Value::Object(Map::new()),
                ..ModelState::default()
            }),
        }
    }
}

impl FakeModel {
    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap()
    }

    pub fn leader() -> Self {
        let model = Self::default();
        model.set_leader(true);
        model
    }

    pub fn set_leader(&self, leader: bool) {
        self.lock().leader = leader;
    }

    /// Adds a relation whose remote application publishes `app_data`.
    pub fn add_relation(
        &self,
        endpoint: &str,
        remote_app: &str,
        app_data: &[(&str, &str)],
    ) -> RelationId {
        let mut state = self.lock();
        let relation = RelationId::new(endpoint, state.next_relation_id);
        state.next_relation_id += 1;
        let mut fake = FakeRelation {
            remote_app: remote_app.to_string(),
            ..FakeRelation::default()
        };
        fake.bags.insert(remote_app.to_string(), to_databag(app_data));
        state.relations.insert(relation.clone(), fake);
        relation
    }

    pub fn add_peer_relation(&self) -> RelationId {
        self.add_relation(APP, APP, &[])
    }

    pub fn add_relation_unit(&self, relation: &RelationId, unit: &str, data: &[(&str, &str)]) {
        let mut state = self.lock();
        let fake = state.relations.get_mut(relation).unwrap();
        fake.units.push(unit.to_string());
        fake.bags.insert(unit.to_string(), to_databag(data));
    }

    pub fn set_relation_data(&self, relation: &RelationId, member: &str, data: &[(&str, &str)]) {
        let mut state = self.lock();
        let fake = state.relations.get_mut(relation).unwrap();
        fake.bags.insert(member.to_string(), to_databag(data));
    }

    /// The data bag of `member` (this app, this unit, or a remote) on `relation`.
    pub fn relation_data(&self, relation: &RelationId, member: &str) -> Databag {
        self.lock()
            .relations
            .get(relation)
            .and_then(|fake| fake.bags.get(member).cloned())
            .unwrap_or_default()
    }

    pub fn remove_relation(&self, relation: &RelationId) {
        self.lock().relations.remove(relation);
    }

    pub fn set_config(&self, key: &str, value: Value) {
        self.lock().config.insert(key.to_string(), value);
    }

    pub fn add_secret(&self, id: &str, content: &[(&str, &str)]) {
        self.lock()
            .secrets
            .insert(id.to_string(), to_databag(content));
    }

    pub fn status(&self) -> Option<UnitStatus> {
        self.lock().statuses.last().cloned()
    }

    pub fn statuses(&self) -> Vec<UnitStatus> {
        self.lock().statuses.clone()
    }

    pub fn workload_version(&self) -> Option<String> {
        self.lock().version.clone()
    }

    pub fn opened_ports(&self) -> Vec<(String, u16)> {
        self.lock().ports.clone()
    }

    pub fn state(&self, key: &str) -> Option<String> {
        self.lock().state.get(key).cloned()
    }

    pub fn set_state(&self, key: &str, value: &str) {
        self.lock()
            .state
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_action_params(&self, params: Value) {
        self.lock().action_params = params;
    }

    pub fn action_results(&self) -> Databag {
        self.lock().action_results.clone()
    }

    pub fn action_failure(&self) -> Option<String> {
        self.lock().action_failure.clone()
    }

    /// Every `relation-set` issued so far, in order.
    pub fn relation_writes(&self) -> Vec<(RelationId, Databag)> {
        self.lock().relation_writes.clone()
    }
}

fn to_databag(data: &[(&str, &str)]) -> Databag {
    data.iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[async_trait]
impl Model for FakeModel {
    fn app_name(&self) -> &str {
        APP
    }

    fn unit_name(&self) -> &str {
        UNIT
    }

    fn model_name(&self) -> &str {
        MODEL
    }

    fn model_uuid(&self) -> &str {
        MODEL_UUID
    }

    async fn is_leader(&self) -> Result<bool, hook_tools::Error> {
        Ok(self.lock().leader)
    }

    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>, hook_tools::Error> {
        Ok(self
            .lock()
            .relations
            .keys()
            .filter(|relation| relation.endpoint == endpoint)
            .cloned()
            .collect())
    }

    async fn relation_units(
        &self,
        relation: &RelationId,
    ) -> Result<Vec<String>, hook_tools::Error> {
        Ok(self
            .lock()
            .relations
            .get(relation)
            .map(|fake| fake.units.clone())
            .unwrap_or_default())
    }

    async fn relation_remote_app(
        &self,
        relation: &RelationId,
    ) -> Result<Option<String>, hook_tools::Error> {
        Ok(self
            .lock()
            .relations
            .get(relation)
            .map(|fake| fake.remote_app.clone()))
    }

    async fn relation_get(
        &self,
        relation: &RelationId,
        member: &Member,
    ) -> Result<Databag, hook_tools::Error> {
        Ok(self.relation_data(relation, member.name()))
    }

    async fn relation_set(
        &self,
        relation: &RelationId,
        app_scope: bool,
        data: &Databag,
    ) -> Result<(), hook_tools::Error> {
        let mut state = self.lock();
        state.relation_writes.push((relation.clone(), data.clone()));
        let owner = if app_scope { APP } else { UNIT };
        let Some(fake) = state.relations.get_mut(relation) else {
            return Ok(());
        };
        let bag = fake.bags.entry(owner.to_string()).or_default();
        for (key, value) in data {
            if value.is_empty() {
                bag.remove(key);
            } else {
                bag.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn config(&self) -> Result<Map<String, Value>, hook_tools::Error> {
        Ok(self.lock().config.clone())
    }

    async fn secret_get(&self, id: &str) -> Result<Databag, hook_tools::Error> {
        self.lock()
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| hook_tools::Error::HookToolFailed {
                tool: "secret-get",
                code: Some(1),
                stderr: format!("secret {id:?} not found"),
            })
    }

    async fn status_set(&self, status: &UnitStatus) -> Result<(), hook_tools::Error> {
        self.lock().statuses.push(status.clone());
        Ok(())
    }

    async fn application_version_set(&self, version: &str) -> Result<(), hook_tools::Error> {
        self.lock().version = Some(version.to_string());
        Ok(())
    }

    async fn open_port(&self, protocol: &str, port: u16) -> Result<(), hook_tools::Error> {
        self.lock().ports.push((protocol.to_string(), port));
        Ok(())
    }

    async fn state_get(&self, key: &str) -> Result<Option<String>, hook_tools::Error> {
        Ok(self.state(key))
    }

    async fn state_set(&self, key: &str, value: &str) -> Result<(), hook_tools::Error> {
        self.set_state(key, value);
        Ok(())
    }

    async fn action_get(&self) -> Result<Value, hook_tools::Error> {
        Ok(self.lock().action_params.clone())
    }

    async fn action_set(&self, results: &Databag) -> Result<(), hook_tools::Error> {
        self.lock()
            .action_results
            .extend(results.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn action_fail(&self, message: &str) -> Result<(), hook_tools::Error> {
        self.lock().action_failure = Some(message.to_string());
        Ok(())
    }

    async fn action_log(&self, message: &str) -> Result<(), hook_tools::Error> {
        self.lock().action_logs.push(message.to_string());
        Ok(())
    }
}

/// Canned response of [`FakeContainer::exec`] for commands starting with a given prefix.
#[derive(Clone, Debug)]
pub enum ExecResponse {
    Output { stdout: String, stderr: String },
    Exit { code: i32, stderr: String },
}

impl ExecResponse {
    pub fn stdout(stdout: &str) -> Self {
        ExecResponse::Output {
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn stderr(stderr: &str) -> Self {
        ExecResponse::Output {
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        ExecResponse::Exit {
            code,
            stderr: stderr.to_string(),
        }
    }
}

#[derive(Default)]
struct ContainerState {
    unreachable: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    layers: Vec<(String, Layer)>,
    replans: usize,
    replan_error: Option<String>,
    running: bool,
    exec_handlers: Vec<(Vec<String>, ExecResponse)>,
    exec_calls: Vec<(Vec<String>, ExecOptions)>,
    operations: Vec<String>,
}

#[derive(Default)]
pub struct FakeContainer {
    state: Mutex<ContainerState>,
}

impl FakeContainer {
    fn lock(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn fail_replan(&self, message: &str) {
        self.lock().replan_error = Some(message.to_string());
    }

    /// Answers every command starting with `prefix`; the latest matching registration wins.
    pub fn on_exec(&self, prefix: &[&str], response: ExecResponse) {
        self.lock().exec_handlers.push((
            prefix.iter().map(|part| part.to_string()).collect(),
            response,
        ));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn layers(&self) -> Vec<(String, Layer)> {
        self.lock().layers.clone()
    }

    pub fn last_layer(&self) -> Option<Layer> {
        self.lock().layers.last().map(|(_, layer)| layer.clone())
    }

    pub fn replans(&self) -> usize {
        self.lock().replans
    }

    pub fn exec_calls(&self) -> Vec<(Vec<String>, ExecOptions)> {
        self.lock().exec_calls.clone()
    }

    /// Mutating operations in the order they happened, e.g. `push /path`, `exec migrate up`.
    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }
}

#[async_trait]
impl Container for FakeContainer {
    async fn can_connect(&self) -> bool {
        !self.lock().unreachable
    }

    async fn is_dir(&self, path: &str) -> Result<bool, pebble::Error> {
        Ok(self.has_dir(path))
    }

    async fn make_dir(&self, path: &str, _make_parents: bool) -> Result<(), pebble::Error> {
        let mut state = self.lock();
        state.dirs.insert(path.to_string());
        state.operations.push(format!("mkdir {path}"));
        Ok(())
    }

    async fn push(
        &self,
        path: &str,
        content: &[u8],
        _make_dirs: bool,
    ) -> Result<(), pebble::Error> {
        let mut state = self.lock();
        state.files.insert(path.to_string(), content.to_vec());
        state.operations.push(format!("push {path}"));
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), pebble::Error> {
        let mut state = self.lock();
        if state.files.remove(path).is_none() {
            return Err(pebble::Error::Api {
                status: 404,
                message: format!("stat {path}: no such file or directory"),
            });
        }
        state.operations.push(format!("remove {path}"));
        Ok(())
    }

    async fn add_layer(
        &self,
        label: &str,
        layer: &Layer,
        _combine: bool,
    ) -> Result<(), pebble::Error> {
        let mut state = self.lock();
        state.layers.push((label.to_string(), layer.clone()));
        state.operations.push(format!("add-layer {label}"));
        Ok(())
    }

    async fn replan(&self) -> Result<(), pebble::Error> {
        let mut state = self.lock();
        state.operations.push("replan".to_string());
        if let Some(message) = state.replan_error.clone() {
            return Err(pebble::Error::ChangeFailed {
                change: "1".to_string(),
                message,
            });
        }
        state.replans += 1;
        state.running = true;
        Ok(())
    }

    async fn service_is_running(&self, _service: &str) -> Result<bool, pebble::Error> {
        Ok(self.lock().running)
    }

    async fn exec(
        &self,
        command: &[String],
        options: &ExecOptions,
    ) -> Result<ExecOutput, pebble::ExecError> {
        let mut state = self.lock();
        state.exec_calls.push((command.to_vec(), options.clone()));
        state
            .operations
            .push(format!("exec {}", command[1..].join(" ")));
        let response = state
            .exec_handlers
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map(|(_, response)| response.clone());
        match response {
            Some(ExecResponse::Output { stdout, stderr }) => Ok(ExecOutput { stdout, stderr }),
            Some(ExecResponse::Exit { code, stderr }) => {
                Err(pebble::ExecError::Exited { code, stderr })
            }
            None => Ok(ExecOutput::default()),
        }
    }
}
