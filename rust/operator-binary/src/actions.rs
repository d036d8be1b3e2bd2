//! Operator-invoked actions.
//!
//! An action that cannot do its job reports that through `action-fail` with a message meant
//! for the operator. Only failures to talk to the agent are returned as [`Error`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use snafu::{ResultExt, Snafu};

use crate::{
    cli::{CommandLine, MIGRATION_TIMEOUT},
    integrations::{relation_exists, DatabaseConfig, PEER},
    juju::{hook_tools, Container, Databag, Model},
    peer_data::{self, PeerData},
    workload::WorkloadService,
};

const SERVICE_NOT_READY: &str =
    "Service is not ready. Please re-run the action when the charm is active";
const CREATE_IDENTITY_FAILED: &str = "Failed to create the identity. Please check the juju logs";
const MIGRATION_STATUS_FAILED: &str = "Failed to fetch the status of all database migrations";
const DATABASE_NOT_READY: &str = "Database integration is not ready yet";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read the action parameters"))]
    ReadParameters { source: hook_tools::Error },

    #[snafu(display("failed to report the outcome of action {action}"))]
    ReportOutcome {
        source: hook_tools::Error,
        action: Action,
    },

    #[snafu(display("failed to check leadership"))]
    CheckLeadership { source: hook_tools::Error },

    #[snafu(display("failed to record the migration version"))]
    RecordMigrationVersion { source: peer_data::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    CreateIdentity,
    RunMigrationUp,
    RunMigrationDown,
    RunMigrationStatus,
}

#[derive(Clone, Copy, Debug, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Deserialize)]
struct CreateIdentityParams {
    #[serde(default)]
    traits: Value,
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default)]
    password: Option<String>,
}

fn default_schema() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
struct MigrationParams {
    #[serde(default)]
    version: Option<String>,
    #[serde(default = "default_migration_timeout")]
    timeout: u64,
}

fn default_migration_timeout() -> u64 {
    MIGRATION_TIMEOUT.as_secs()
}

pub struct ActionRunner<'a> {
    model: &'a dyn Model,
    container: &'a dyn Container,
}

impl<'a> ActionRunner<'a> {
    pub fn new(model: &'a dyn Model, container: &'a dyn Container) -> Self {
        Self { model, container }
    }

    pub async fn run(&self, action: Action) -> Result<()> {
        tracing::info!(%action, "running action");
        let params = self.model.action_get().await.context(ReadParametersSnafu)?;
        match action {
            Action::CreateIdentity => match serde_json::from_value(params) {
                Ok(params) => self.create_identity(params).await,
                Err(error) => self.reject(action, &error).await,
            },
            Action::RunMigrationUp | Action::RunMigrationDown => {
                let direction = if action == Action::RunMigrationUp {
                    Direction::Up
                } else {
                    Direction::Down
                };
                match serde_json::from_value(params) {
                    Ok(params) => self.migrate(action, direction, params).await,
                    Err(error) => self.reject(action, &error).await,
                }
            }
            Action::RunMigrationStatus => self.migration_status().await,
        }
    }

    async fn create_identity(&self, params: CreateIdentityParams) -> Result<()> {
        let action = Action::CreateIdentity;
        let workload = WorkloadService::new(self.model, self.container);
        if !workload.is_running().await {
            return self.fail(action, SERVICE_NOT_READY).await;
        }

        let created = CommandLine::new(self.container)
            .create_identity(&params.traits, &params.schema, params.password.as_deref())
            .await;
        match created {
            Ok(Some(identity_id)) => {
                self.log(action, &format!("Identity created: {identity_id}"))
                    .await?;
                self.report(action, &[("identity-id", identity_id)]).await
            }
            Ok(None) => self.fail(action, CREATE_IDENTITY_FAILED).await,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to create identity"
                );
                self.fail(action, CREATE_IDENTITY_FAILED).await
            }
        }
    }

    async fn migrate(
        &self,
        action: Action,
        direction: Direction,
        params: MigrationParams,
    ) -> Result<()> {
        if !self.model.is_leader().await.context(CheckLeadershipSnafu)? {
            return self
                .fail(action, "Non-leader unit cannot run migration action")
                .await;
        }
        let workload = WorkloadService::new(self.model, self.container);
        if !workload.is_running().await {
            return self.fail(action, SERVICE_NOT_READY).await;
        }
        if !relation_exists(self.model, PEER).await {
            return self.fail(action, "Peer integration is not ready yet").await;
        }
        let database = DatabaseConfig::load(self.model).await;
        if !database.is_ready() {
            return self.fail(action, DATABASE_NOT_READY).await;
        }

        self.log(action, &format!("Migrating {direction} the database"))
            .await?;
        let cli = CommandLine::new(self.container);
        let dsn = database.dsn();
        let timeout = Duration::from_secs(params.timeout);
        let migrated = match direction {
            Direction::Up => cli.migrate_up(&dsn, timeout).await,
            Direction::Down => {
                cli.migrate_down(&dsn, params.version.as_deref(), timeout)
                    .await
            }
        };
        if let Err(error) = migrated {
            tracing::error!(
                %direction,
                error = &error as &dyn std::error::Error,
                "database migration failed"
            );
            return self
                .fail(action, &format!("Database migration {direction} failed"))
                .await;
        }

        match workload.version().await {
            Some(version) => PeerData::new(self.model)
                .set(&database.migration_version_key, &json!(version))
                .await
                .context(RecordMigrationVersionSnafu)?,
            None => tracing::warn!("workload version unknown, migration version not recorded"),
        }
        self.log(action, &format!("Successfully migrated {direction} the database"))
            .await
    }

    async fn migration_status(&self) -> Result<()> {
        let action = Action::RunMigrationStatus;
        let workload = WorkloadService::new(self.model, self.container);
        if !workload.is_running().await {
            return self.fail(action, SERVICE_NOT_READY).await;
        }
        let database = DatabaseConfig::load(self.model).await;
        if !database.is_ready() {
            return self.fail(action, DATABASE_NOT_READY).await;
        }
        match CommandLine::new(self.container)
            .migrate_status(&database.dsn())
            .await
        {
            Ok(status) => self.report(action, &[("status", status)]).await,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to fetch migration status"
                );
                self.fail(action, MIGRATION_STATUS_FAILED).await
            }
        }
    }

    async fn reject(&self, action: Action, error: &serde_json::Error) -> Result<()> {
        tracing::warn!(
            %action,
            error = error as &dyn std::error::Error,
            "invalid action parameters"
        );
        self.fail(action, &format!("Invalid parameters: {error}"))
            .await
    }

    async fn report(&self, action: Action, results: &[(&str, String)]) -> Result<()> {
        let results = results
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect::<Databag>();
        self.model
            .action_set(&results)
            .await
            .context(ReportOutcomeSnafu { action })
    }

    async fn log(&self, action: Action, message: &str) -> Result<()> {
        self.model
            .action_log(message)
            .await
            .context(ReportOutcomeSnafu { action })
    }

    async fn fail(&self, action: Action, message: &str) -> Result<()> {
        tracing::warn!(%action, message, "action failed");
        self.model
            .action_fail(message)
            .await
            .context(ReportOutcomeSnafu { action })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        integrations::DATABASE,
        testing::{ExecResponse, FakeContainer, FakeModel, APP},
    };

    const BINARY: &str = "identity-platform-admin-ui";

    fn running_container() -> FakeContainer {
        let container = FakeContainer::default();
        container.set_running(true);
        container.on_exec(&[BINARY, "version"], ExecResponse::stdout("App Version: 1.2.0\n"));
        container
    }

    fn database(model: &FakeModel) -> String {
        let relation = model.add_relation(
            DATABASE,
            "postgresql-k8s",
            &[
                ("endpoints", "postgresql-k8s-primary:5432"),
                ("username", "relation_id_7"),
                ("password", "pw"),
            ],
        );
        format!("migration_version_{}", relation.id)
    }

    #[tokio::test]
    async fn create_identity_reports_the_identity_id() {
        let model = FakeModel::default();
        model.set_action_params(json!({
            "traits": {"email": "a@b.com"},
            "schema": "s",
            "password": "p",
        }));
        let container = running_container();
        container.on_exec(
            &[BINARY, "create-identity"],
            ExecResponse::stdout("Identity created: xyz\n"),
        );

        ActionRunner::new(&model, &container)
            .run(Action::CreateIdentity)
            .await
            .unwrap();

        assert_eq!(
            model.action_results(),
            Databag::from([("identity-id".to_string(), "xyz".to_string())])
        );
        assert_eq!(model.action_failure(), None);
    }

    #[rstest]
    #[case::unparsable(ExecResponse::stdout("something else\n"))]
    #[case::exit(ExecResponse::exit(1, "schema s not found"))]
    #[tokio::test]
    async fn create_identity_failure_is_reported(#[case] response: ExecResponse) {
        let model = FakeModel::default();
        model.set_action_params(json!({"traits": {"email": "a@b.com"}}));
        let container = running_container();
        container.on_exec(&[BINARY, "create-identity"], response);

        ActionRunner::new(&model, &container)
            .run(Action::CreateIdentity)
            .await
            .unwrap();

        assert_eq!(model.action_failure().as_deref(), Some(CREATE_IDENTITY_FAILED));
        assert!(model.action_results().is_empty());
    }

    #[tokio::test]
    async fn create_identity_needs_a_running_service() {
        let model = FakeModel::default();
        let container = FakeContainer::default();

        ActionRunner::new(&model, &container)
            .run(Action::CreateIdentity)
            .await
            .unwrap();

        assert_eq!(model.action_failure().as_deref(), Some(SERVICE_NOT_READY));
        assert!(container.exec_calls().is_empty());
    }

    #[rstest]
    #[case::follower(false, true, true, "Non-leader unit cannot run migration action")]
    #[case::stopped(true, false, true, SERVICE_NOT_READY)]
    #[case::no_peers(true, true, false, "Peer integration is not ready yet")]
    #[tokio::test]
    async fn migration_preconditions(
        #[case] leader: bool,
        #[case] running: bool,
        #[case] peers: bool,
        #[case] message: &str,
    ) {
        let model = FakeModel::default();
        model.set_leader(leader);
        if peers {
            model.add_peer_relation();
        }
        database(&model);
        let container = running_container();
        container.set_running(running);

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationUp)
            .await
            .unwrap();

        assert_eq!(model.action_failure().as_deref(), Some(message));
        assert!(!container
            .operations()
            .iter()
            .any(|operation| operation.starts_with("exec migrate")));
    }

    #[tokio::test]
    async fn successful_migration_records_the_version() {
        let model = FakeModel::leader();
        let peers = model.add_peer_relation();
        let key = database(&model);
        model.set_action_params(json!({"timeout": 30}));
        let container = running_container();

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationUp)
            .await
            .unwrap();

        assert_eq!(model.action_failure(), None);
        assert_eq!(model.relation_data(&peers, APP)[&key], r#""1.2.0""#);
        let calls = container.exec_calls();
        let (command, options) = calls
            .iter()
            .find(|(command, _)| command[1] == "migrate")
            .unwrap();
        assert_eq!(command.last().map(String::as_str), Some("up"));
        assert_eq!(options.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn failed_migration_leaves_the_marker_alone() {
        let model = FakeModel::leader();
        let peers = model.add_peer_relation();
        let key = database(&model);
        model.set_action_params(json!({"version": "20240101"}));
        let container = running_container();
        container.on_exec(&[BINARY, "migrate"], ExecResponse::exit(1, "no such version"));

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationDown)
            .await
            .unwrap();

        assert_eq!(
            model.action_failure().as_deref(),
            Some("Database migration down failed")
        );
        assert!(!model.relation_data(&peers, APP).contains_key(&key));
    }

    #[tokio::test]
    async fn migration_status_is_returned() {
        let model = FakeModel::default();
        database(&model);
        let container = running_container();
        container.on_exec(
            &[BINARY, "migrate"],
            ExecResponse::stderr("Applied At                  Migration\n"),
        );

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationStatus)
            .await
            .unwrap();

        assert_eq!(
            model.action_results()["status"],
            "Applied At                  Migration\n"
        );
    }

    #[tokio::test]
    async fn migration_status_failure_is_reported() {
        let model = FakeModel::default();
        database(&model);
        let container = running_container();
        container.on_exec(&[BINARY, "migrate"], ExecResponse::exit(1, "connection refused"));

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationStatus)
            .await
            .unwrap();

        assert_eq!(model.action_failure().as_deref(), Some(MIGRATION_STATUS_FAILED));
    }

    #[tokio::test]
    async fn migration_status_needs_a_ready_database() {
        let model = FakeModel::default();
        let container = running_container();

        ActionRunner::new(&model, &container)
            .run(Action::RunMigrationStatus)
            .await
            .unwrap();

        assert_eq!(model.action_failure().as_deref(), Some(DATABASE_NOT_READY));
        assert!(container.exec_calls().is_empty());
    }

    #[test]
    fn action_names_parse() {
        assert_eq!(
            "run-migration-up".parse::<Action>().unwrap(),
            Action::RunMigrationUp
        );
        assert_eq!(Action::CreateIdentity.to_string(), "create-identity");
    }
}
