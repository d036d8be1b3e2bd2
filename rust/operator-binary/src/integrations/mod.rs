//! Typed snapshots of the data other applications publish over their relations.
//!
//! Every snapshot is recomputed on each reconciliation. Loaders never fail: a missing
//! relation, an empty data bag or a missing required key all produce the snapshot's
//! `Default`, which is its not-ready value.

use crate::{
    env_vars::EnvVars,
    juju::{hook_tools, Databag, Member, Model, RelationId},
};

pub mod cert_transfer;
pub mod database;
pub mod identity;
pub mod ingress;
pub mod metrics;
pub mod oauth;
pub mod openfga;
pub mod smtp;
pub mod tracing_endpoint;

pub use cert_transfer::CaBundle;
pub use database::DatabaseConfig;
pub use identity::{HydraData, KratosData, OathkeeperData};
pub use ingress::IngressData;
pub use oauth::OAuthProviderData;
pub use openfga::{OpenFgaIntegrationData, OpenFgaModelData};
pub use smtp::SmtpData;
pub use tracing_endpoint::TracingData;

pub const PEER: &str = "identity-platform-admin-ui";
pub const KRATOS_INFO: &str = "kratos-info";
pub const HYDRA_ENDPOINT_INFO: &str = "hydra-endpoint-info";
pub const OATHKEEPER_INFO: &str = "oathkeeper-info";
pub const OPENFGA: &str = "openfga";
pub const INGRESS: &str = "ingress";
pub const OAUTH: &str = "oauth";
pub const CERTIFICATE_TRANSFER: &str = "receive-ca-cert";
pub const SMTP: &str = "smtp";
pub const DATABASE: &str = "pg-database";
pub const TRACING: &str = "tracing";
pub const METRICS_ENDPOINT: &str = "metrics-endpoint";

/// A source of workload environment variables.
pub trait EnvVarConvertible {
    fn to_env_vars(&self) -> EnvVars;
}

/// The first relation established on `endpoint`, if any.
pub async fn first_relation(model: &dyn Model, endpoint: &str) -> Option<RelationId> {
    match model.relation_ids(endpoint).await {
        Ok(relations) => relations.into_iter().next(),
        Err(error) => {
            tracing::warn!(
                endpoint,
                error = &error as &dyn std::error::Error,
                "failed to list relations"
            );
            None
        }
    }
}

pub async fn relation_exists(model: &dyn Model, endpoint: &str) -> bool {
    first_relation(model, endpoint).await.is_some()
}

/// The application data bag published by the remote side of the first relation on `endpoint`.
///
/// Returns `None` when there is no relation or the remote application has not published
/// anything yet.
pub async fn remote_app_data(
    model: &dyn Model,
    endpoint: &str,
) -> Option<(RelationId, Databag)> {
    let relation = first_relation(model, endpoint).await?;
    let remote_app = match remote_app_name(model, &relation).await {
        Some(remote_app) => remote_app,
        None => {
            tracing::info!(%relation, "remote application is not known yet");
            return None;
        }
    };
    match model.relation_get(&relation, &Member::App(remote_app)).await {
        Ok(data) if data.is_empty() => None,
        Ok(data) => Some((relation, data)),
        Err(error) => {
            tracing::warn!(
                %relation,
                error = &error as &dyn std::error::Error,
                "failed to read remote application data"
            );
            None
        }
    }
}

async fn remote_app_name(model: &dyn Model, relation: &RelationId) -> Option<String> {
    if let Ok(Some(app)) = model.relation_remote_app(relation).await {
        return Some(app);
    }
    let units = model.relation_units(relation).await.ok()?;
    units
        .first()
        .and_then(|unit| unit.split_once('/'))
        .map(|(app, _)| app.to_string())
}

/// Takes `key` from `data` if it is present and not empty.
pub(crate) fn non_empty(data: &Databag, key: &str) -> Option<String> {
    data.get(key).filter(|value| !value.is_empty()).cloned()
}

/// Resolves a value published either inline under `key` or as a secret referenced by `secret_key`,
/// whose content holds it under `field`.
pub(crate) async fn inline_or_secret(
    model: &dyn Model,
    data: &Databag,
    key: &str,
    secret_key: &str,
    field: &str,
) -> Option<String> {
    if let Some(value) = non_empty(data, key) {
        return Some(value);
    }
    let secret_id = non_empty(data, secret_key)?;
    match model.secret_get(&secret_id).await {
        Ok(content) => non_empty(&content, field),
        Err(error) => {
            tracing::warn!(
                secret_key,
                error = &error as &dyn std::error::Error,
                "failed to read secret referenced by relation data"
            );
            None
        }
    }
}

/// Publishes `data` into this application's bag on every relation established on `endpoint`.
pub async fn publish_app_data(
    model: &dyn Model,
    endpoint: &str,
    data: &Databag,
) -> Result<(), hook_tools::Error> {
    let owner = Member::App(model.app_name().to_string());
    publish(model, endpoint, owner, data).await
}

/// Publishes `data` into this unit's bag on every relation established on `endpoint`.
pub async fn publish_unit_data(
    model: &dyn Model,
    endpoint: &str,
    data: &Databag,
) -> Result<(), hook_tools::Error> {
    let owner = Member::Unit(model.unit_name().to_string());
    publish(model, endpoint, owner, data).await
}

async fn publish(
    model: &dyn Model,
    endpoint: &str,
    owner: Member,
    data: &Databag,
) -> Result<(), hook_tools::Error> {
    let app_scope = matches!(owner, Member::App(_));
    for relation in &model.relation_ids(endpoint).await? {
        let current = model.relation_get(relation, &owner).await?;
        let changed = data
            .iter()
            .any(|(key, value)| current.get(key) != Some(value));
        if changed {
            tracing::debug!(%relation, app_scope, "publishing relation data");
            model.relation_set(relation, app_scope, data).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{peer_data::PeerData, testing::FakeModel};

    #[derive(Clone, Copy, Debug)]
    enum Snapshot {
        Kratos,
        Hydra,
        Oathkeeper,
        OpenFga,
        OpenFgaModel,
        Ingress,
        OAuth,
        CaBundle,
        Smtp,
        Database,
        Tracing,
    }

    impl Snapshot {
        fn endpoint(self) -> &'static str {
            match self {
                Snapshot::Kratos => KRATOS_INFO,
                Snapshot::Hydra => HYDRA_ENDPOINT_INFO,
                Snapshot::Oathkeeper => OATHKEEPER_INFO,
                Snapshot::OpenFga => OPENFGA,
                Snapshot::OpenFgaModel => PEER,
                Snapshot::Ingress => INGRESS,
                Snapshot::OAuth => OAUTH,
                Snapshot::CaBundle => CERTIFICATE_TRANSFER,
                Snapshot::Smtp => SMTP,
                Snapshot::Database => DATABASE,
                Snapshot::Tracing => TRACING,
            }
        }
    }

    #[rstest]
    #[case::kratos(Snapshot::Kratos)]
    #[case::hydra(Snapshot::Hydra)]
    #[case::oathkeeper(Snapshot::Oathkeeper)]
    #[case::openfga(Snapshot::OpenFga)]
    #[case::openfga_model(Snapshot::OpenFgaModel)]
    #[case::ingress(Snapshot::Ingress)]
    #[case::oauth(Snapshot::OAuth)]
    #[case::ca_bundle(Snapshot::CaBundle)]
    #[case::smtp(Snapshot::Smtp)]
    #[case::database(Snapshot::Database)]
    #[case::tracing(Snapshot::Tracing)]
    #[tokio::test]
    async fn loaders_without_data_return_defaults(
        #[case] snapshot: Snapshot,
        #[values(false, true)] related: bool,
    ) {
        let model = FakeModel::leader();
        let relation = related.then(|| model.add_relation(snapshot.endpoint(), "provider", &[]));

        match snapshot {
            Snapshot::Kratos => assert_eq!(KratosData::load(&model).await, KratosData::default()),
            Snapshot::Hydra => assert_eq!(HydraData::load(&model).await, HydraData::default()),
            Snapshot::Oathkeeper => {
                assert_eq!(OathkeeperData::load(&model).await, OathkeeperData::default())
            }
            Snapshot::OpenFga => assert_eq!(
                OpenFgaIntegrationData::load(&model).await,
                OpenFgaIntegrationData::default()
            ),
            Snapshot::OpenFgaModel => assert_eq!(
                OpenFgaModelData::load(&PeerData::new(&model), Some("1.2.0")).await,
                OpenFgaModelData::default()
            ),
            // without a route the unit falls back to its cluster-internal URL
            Snapshot::Ingress => assert!(!IngressData::load(&model).await.is_ready),
            Snapshot::OAuth => assert_eq!(
                OAuthProviderData::load(&model).await,
                OAuthProviderData::default()
            ),
            Snapshot::CaBundle => assert_eq!(CaBundle::load(&model).await, CaBundle::default()),
            Snapshot::Smtp => assert_eq!(SmtpData::load(&model).await, SmtpData::default()),
            Snapshot::Database => {
                let config = DatabaseConfig::load(&model).await;
                assert_eq!(
                    config,
                    DatabaseConfig {
                        database: "testing_identity_platform_admin_ui".to_string(),
                        migration_version_key: relation
                            .map(|relation| format!("migration_version_{}", relation.id))
                            .unwrap_or_default(),
                        ..DatabaseConfig::default()
                    }
                );
                assert!(!config.is_ready());
            }
            Snapshot::Tracing => {
                assert_eq!(TracingData::load(&model).await, TracingData::default())
            }
        }
    }

    #[tokio::test]
    async fn absent_relation_has_no_remote_data() {
        let model = FakeModel::default();
        assert!(remote_app_data(&model, KRATOS_INFO).await.is_none());
        assert!(!relation_exists(&model, KRATOS_INFO).await);
    }

    #[tokio::test]
    async fn empty_remote_bag_counts_as_no_data() {
        let model = FakeModel::default();
        model.add_relation(KRATOS_INFO, "kratos", &[]);
        assert!(relation_exists(&model, KRATOS_INFO).await);
        assert!(remote_app_data(&model, KRATOS_INFO).await.is_none());
    }

    #[tokio::test]
    async fn secrets_are_resolved_when_no_inline_value_exists() {
        let model = FakeModel::default();
        model.add_secret("secret:abc", &[("token", "s3cr3t")]);
        let data = Databag::from([("token_secret_id".to_string(), "secret:abc".to_string())]);
        assert_eq!(
            inline_or_secret(&model, &data, "token", "token_secret_id", "token").await,
            Some("s3cr3t".to_string())
        );

        let dangling = Databag::from([("token_secret_id".to_string(), "secret:gone".to_string())]);
        assert_eq!(
            inline_or_secret(&model, &dangling, "token", "token_secret_id", "token").await,
            None
        );
    }

    #[tokio::test]
    async fn unchanged_application_data_is_not_rewritten() {
        let model = FakeModel::leader();
        model.add_relation(OPENFGA, "openfga-k8s", &[]);
        let request = Databag::from([("store_name".to_string(), "store".to_string())]);

        publish_app_data(&model, OPENFGA, &request).await.unwrap();
        publish_app_data(&model, OPENFGA, &request).await.unwrap();

        assert_eq!(model.relation_writes().len(), 1);
    }

    #[tokio::test]
    async fn unit_data_lands_in_the_unit_bag() {
        let model = FakeModel::default();
        let relation = model.add_relation(INGRESS, "traefik", &[]);
        let request = Databag::from([("host".to_string(), "\"unit\"".to_string())]);

        publish_unit_data(&model, INGRESS, &request).await.unwrap();

        assert_eq!(model.relation_data(&relation, crate::testing::UNIT), request);
        assert!(model.relation_data(&relation, crate::testing::APP).is_empty());
    }
}
