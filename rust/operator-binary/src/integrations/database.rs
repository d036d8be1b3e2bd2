//! Credentials of the PostgreSQL database backing the admin UI.

use super::{first_relation, non_empty, EnvVarConvertible, DATABASE};
use crate::{
    env_vars::EnvVars,
    juju::{Databag, Member, Model, RelationId},
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DatabaseConfig {
    pub endpoint: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Peer data key recording the workload version this database was last migrated to.
    pub migration_version_key: String,
}

impl DatabaseConfig {
    pub async fn load(model: &dyn Model) -> Self {
        let database = database_name(model);
        let Some(relation) = first_relation(model, DATABASE).await else {
            return Self {
                database,
                ..Self::default()
            };
        };
        let migration_version_key = migration_version_key(&relation);
        let mut config = Self {
            database,
            migration_version_key,
            ..Self::default()
        };

        let data = match model.relation_remote_app(&relation).await {
            Ok(Some(app)) => model
                .relation_get(&relation, &Member::App(app))
                .await
                .unwrap_or_default(),
            _ => Databag::new(),
        };
        let Some(endpoint) = non_empty(&data, "endpoints")
            .and_then(|endpoints| endpoints.split(',').next().map(str::to_string))
        else {
            tracing::info!("database has not been created yet");
            return config;
        };
        let Some((username, password)) = credentials(model, &data).await else {
            tracing::warn!("database data is missing its credentials");
            return config;
        };
        config.endpoint = endpoint;
        config.username = username;
        config.password = password;
        config
    }

    pub fn is_ready(&self) -> bool {
        !self.endpoint.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}/{}",
            self.username, self.password, self.endpoint, self.database
        )
    }

    /// The application data requesting a database.
    pub fn database_request(&self) -> Databag {
        Databag::from([("database".to_string(), self.database.clone())])
    }
}

async fn credentials(model: &dyn Model, data: &Databag) -> Option<(String, String)> {
    if let (Some(username), Some(password)) =
        (non_empty(data, "username"), non_empty(data, "password"))
    {
        return Some((username, password));
    }
    let secret_id = non_empty(data, "secret-user")?;
    let content = model
        .secret_get(&secret_id)
        .await
        .inspect_err(|error| {
            tracing::warn!(
                error = error as &dyn std::error::Error,
                "failed to read database credentials secret"
            )
        })
        .ok()?;
    Some((non_empty(&content, "username")?, non_empty(&content, "password")?))
}

fn database_name(model: &dyn Model) -> String {
    format!("{}_{}", model.model_name(), model.app_name()).replace('-', "_")
}

fn migration_version_key(relation: &RelationId) -> String {
    format!("migration_version_{}", relation.id)
}

impl EnvVarConvertible for DatabaseConfig {
    fn to_env_vars(&self) -> EnvVars {
        let dsn = if self.is_ready() { self.dsn() } else { String::new() };
        EnvVars::from([("DSN".to_string(), dsn)])
    }
}
