//! Invocations of the workload binary inside the container.
//!
//! A command that fails to run or exits non-zero is an [`Error`]. A command that succeeds
//! but prints something unexpected yields `None`, which callers treat as "not available yet".

use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use serde_json::{json, Value};
use snafu::{ResultExt, Snafu};

use crate::{
    juju::{pebble::ExecError, Container, ExecOptions},
    workload::WORKLOAD_SERVICE,
};

const BINARY: &str = "identity-platform-admin-ui";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const MIGRATION_TIMEOUT: Duration = Duration::from_secs(120);

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)App Version:\s*(?P<version>\S+)\s*$")
        .expect("invalid hard-coded version regex")
});
static MODEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Created model:\s*(?P<model>\S+)").expect("invalid hard-coded model regex")
});
static IDENTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Identity created:\s*(?P<identity>\S+)")
        .expect("invalid hard-coded identity regex")
});

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to run {BINARY} {subcommand}"))]
    Execute {
        source: ExecError,
        subcommand: &'static str,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct CommandLine<'a> {
    container: &'a dyn Container,
}

impl<'a> CommandLine<'a> {
    pub fn new(container: &'a dyn Container) -> Self {
        Self { container }
    }

    /// Runs `BINARY subcommand args...`, returning its stdout and stderr.
    async fn run(
        &self,
        subcommand: &'static str,
        args: &[&str],
        options: ExecOptions,
    ) -> Result<(String, String)> {
        let command = std::iter::once(BINARY)
            .chain(std::iter::once(subcommand))
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect::<Vec<_>>();
        // arguments may carry credentials, only the subcommand is logged
        tracing::debug!(subcommand, "running workload command");
        match self.container.exec(&command, &options).await {
            Ok(output) => Ok((output.stdout, output.stderr)),
            Err(error) => {
                if let ExecError::Exited { code, stderr } = &error {
                    tracing::error!(subcommand, code, stderr, "workload command failed");
                }
                Err(error).context(ExecuteSnafu { subcommand })
            }
        }
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let (stdout, _) = self.run("version", &[], ExecOptions::default()).await?;
        Ok(capture(&VERSION_REGEX, &stdout, "version"))
    }

    pub async fn create_openfga_model(
        &self,
        url: &str,
        api_token: &str,
        store_id: &str,
    ) -> Result<Option<String>> {
        let (stdout, _) = self
            .run(
                "create-fga-model",
                &[
                    "--fga-api-url",
                    url,
                    "--fga-api-token",
                    api_token,
                    "--fga-store-id",
                    store_id,
                ],
                ExecOptions::default(),
            )
            .await?;
        Ok(capture(&MODEL_REGEX, &stdout, "model"))
    }

    /// Creates an identity from `traits`, read by the workload from stdin.
    pub async fn create_identity(
        &self,
        traits: &Value,
        schema_id: &str,
        password: Option<&str>,
    ) -> Result<Option<String>> {
        let identity = identity_document(traits, schema_id, password);
        let (stdout, _) = self
            .run(
                "create-identity",
                &[],
                ExecOptions {
                    service_context: Some(WORKLOAD_SERVICE.to_string()),
                    stdin: Some(identity.to_string()),
                    ..ExecOptions::default()
                },
            )
            .await?;
        Ok(capture(&IDENTITY_REGEX, &stdout, "identity"))
    }

    pub async fn migrate_up(&self, dsn: &str, timeout: Duration) -> Result<()> {
        self.run("migrate", &["--dsn", dsn, "up"], migration_options(timeout))
            .await
            .map(drop)
    }

    pub async fn migrate_down(
        &self,
        dsn: &str,
        version: Option<&str>,
        timeout: Duration,
    ) -> Result<()> {
        let mut args = vec!["--dsn", dsn, "down"];
        args.extend(version);
        self.run("migrate", &args, migration_options(timeout))
            .await
            .map(drop)
    }

    /// The migration status report, which the workload prints on stderr.
    pub async fn migrate_status(&self, dsn: &str) -> Result<String> {
        let (stdout, stderr) = self
            .run(
                "migrate",
                &["--dsn", dsn, "status"],
                migration_options(DEFAULT_TIMEOUT),
            )
            .await?;
        Ok(if stderr.is_empty() { stdout } else { stderr })
    }
}

fn migration_options(timeout: Duration) -> ExecOptions {
    ExecOptions {
        service_context: Some(WORKLOAD_SERVICE.to_string()),
        timeout,
        ..ExecOptions::default()
    }
}

fn identity_document(traits: &Value, schema_id: &str, password: Option<&str>) -> Value {
    let mut identity = json!({ "traits": traits, "schema_id": schema_id });
    if let Some(password) = password.filter(|password| !password.is_empty()) {
        identity["credentials"] = json!({ "password": { "config": { "password": password } } });
    }
    identity
}

fn capture(regex: &Regex, output: &str, group: &str) -> Option<String> {
    let captured = regex
        .captures(output)
        .and_then(|captures| captures.name(group))
        .map(|value| value.as_str().to_string());
    if captured.is_none() {
        tracing::warn!(group, "unexpected output of workload command");
    }
    captured
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::testing::{ExecResponse, FakeContainer};

    #[rstest]
    #[case("App Version: 1.2.0\n", Some("1.2.0"))]
    #[case("starting\nApp Version:   v1.10.1  \n", Some("v1.10.1"))]
    #[case("version unknown\n", None)]
    #[tokio::test]
    async fn parses_version(#[case] stdout: &str, #[case] expected: Option<&str>) {
        let container = FakeContainer::default();
        container.on_exec(&[BINARY, "version"], ExecResponse::stdout(stdout));

        let version = CommandLine::new(&container).version().await.unwrap();
        assert_eq!(version.as_deref(), expected);
    }

    #[tokio::test]
    async fn create_openfga_model_passes_store_coordinates() {
        let container = FakeContainer::default();
        container.on_exec(
            &[BINARY, "create-fga-model"],
            ExecResponse::stdout("Created model: 01HQJMD174NPN2A4JFRFZ1NNW1\n"),
        );

        let model = CommandLine::new(&container)
            .create_openfga_model("http://127.0.0.1:8080", "token", "store_id")
            .await
            .unwrap();
        assert_eq!(model.as_deref(), Some("01HQJMD174NPN2A4JFRFZ1NNW1"));
        let calls = container.exec_calls();
        let (command, _) = &calls[0];
        assert_eq!(
            command[2..],
            [
                "--fga-api-url",
                "http://127.0.0.1:8080",
                "--fga-api-token",
                "token",
                "--fga-store-id",
                "store_id"
            ]
        );
    }

    #[tokio::test]
    async fn create_identity_sends_identity_on_stdin() {
        let container = FakeContainer::default();
        container.on_exec(
            &[BINARY, "create-identity"],
            ExecResponse::stdout("Identity created: xyz\n"),
        );

        let identity = CommandLine::new(&container)
            .create_identity(&json!({"email": "a@b.com"}), "s", Some("p"))
            .await
            .unwrap();
        assert_eq!(identity.as_deref(), Some("xyz"));

        let calls = container.exec_calls();
        let (_, options) = &calls[0];
        let stdin: Value = serde_json::from_str(options.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(
            stdin,
            json!({
                "traits": {"email": "a@b.com"},
                "schema_id": "s",
                "credentials": {"password": {"config": {"password": "p"}}},
            })
        );
        assert_eq!(options.service_context.as_deref(), Some(WORKLOAD_SERVICE));
    }

    #[test]
    fn identity_without_password_has_no_credentials() {
        assert_eq!(
            identity_document(&json!({}), "default", None),
            json!({"traits": {}, "schema_id": "default"})
        );
    }

    #[tokio::test]
    async fn migrations_use_migration_timeout_and_surface_failures() {
        let container = FakeContainer::default();
        container.on_exec(&[BINARY, "migrate"], ExecResponse::exit(1, "connection refused"));
        let cli = CommandLine::new(&container);

        let error = cli
            .migrate_up("postgres://u:p@db/admin", MIGRATION_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::Execute {
                source: ExecError::Exited { code: 1, .. },
                ..
            }
        ));
        let calls = container.exec_calls();
        let (command, options) = &calls[0];
        assert_eq!(command.last().map(String::as_str), Some("up"));
        assert_eq!(options.timeout, MIGRATION_TIMEOUT);
    }

    #[tokio::test]
    async fn migrate_down_targets_an_optional_version() {
        let container = FakeContainer::default();
        let cli = CommandLine::new(&container);
        cli.migrate_down("dsn", Some("20240101"), MIGRATION_TIMEOUT)
            .await
            .unwrap();
        let calls = container.exec_calls();
        let (command, _) = &calls[0];
        assert_eq!(command[2..], ["--dsn", "dsn", "down", "20240101"]);
    }

    #[tokio::test]
    async fn migrate_status_reports_stderr() {
        let container = FakeContainer::default();
        container.on_exec(&[BINARY, "migrate"], ExecResponse::stderr("Applied At  Migration\n"));
        let status = CommandLine::new(&container).migrate_status("dsn").await.unwrap();
        assert_eq!(status, "Applied At  Migration\n");
    }
}
