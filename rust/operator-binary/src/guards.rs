//! Preconditions of a reconciliation.
//!
//! Block conditions describe something only an operator can fix, so a failure leaves the unit
//! blocked until the next event. Defer conditions describe something that resolves by itself,
//! so a failure re-queues the event. Block conditions are always evaluated first.

use crate::{
    config::CharmConfig,
    integrations::{
        CaBundle, DatabaseConfig, HydraData, IngressData, KratosData, OAuthProviderData,
        OathkeeperData, OpenFgaIntegrationData, OpenFgaModelData, SmtpData, TracingData,
    },
};

pub const MIGRATION_PENDING_ON_FOLLOWER: &str = "Waiting for leader unit to run the migration";

/// Everything a reconciliation looks at, gathered once up front.
#[derive(Clone, Debug, Default)]
pub struct Observed {
    pub leader: bool,
    pub container_reachable: bool,
    pub workload_version: Option<String>,

    pub peer_relation: bool,
    pub kratos_relation: bool,
    pub hydra_relation: bool,
    pub openfga_relation: bool,
    pub database_relation: bool,
    pub ingress_relation: bool,
    pub oauth_relation: bool,
    pub ca_relation: bool,

    pub config: CharmConfig,
    pub kratos: KratosData,
    pub hydra: HydraData,
    pub oathkeeper: OathkeeperData,
    pub openfga: OpenFgaIntegrationData,
    pub openfga_model: OpenFgaModelData,
    pub ingress: IngressData,
    pub oauth: OAuthProviderData,
    pub ca_bundle: CaBundle,
    pub smtp: SmtpData,
    pub database: DatabaseConfig,
    pub tracing: TracingData,
    /// Whether the OAuth issuer can be reached trusting only [`Self::ca_bundle`].
    pub oauth_issuer_trusted: bool,
}

pub struct Condition {
    pub name: &'static str,
    pub reason: &'static str,
    pub holds: fn(&Observed) -> bool,
}

pub const BLOCK_CONDITIONS: &[Condition] = &[
    Condition {
        name: "kratos-info relation",
        reason: "Missing required relation with kratos",
        holds: |observed| observed.kratos_relation,
    },
    Condition {
        name: "hydra-endpoint-info relation",
        reason: "Missing required relation with hydra",
        holds: |observed| observed.hydra_relation,
    },
    Condition {
        name: "openfga relation",
        reason: "Missing required relation with openfga",
        holds: |observed| observed.openfga_relation,
    },
    Condition {
        name: "pg-database relation",
        reason: "Missing required relation with postgresql",
        holds: |observed| observed.database_relation,
    },
    Condition {
        name: "ingress relation for oauth",
        reason: "Ingress relation is required for oauth",
        holds: |observed| !observed.oauth_relation || observed.ingress_relation,
    },
    Condition {
        name: "ca certificates for oauth",
        reason: "Missing certificate_transfer relation with oauth provider",
        holds: |observed| {
            !observed.oauth_relation || (observed.ca_relation && observed.ca_bundle.is_ready())
        },
    },
    Condition {
        name: "oauth issuer trust",
        reason: "Untrusted oauth provider certificate",
        holds: |observed| !observed.oauth_relation || observed.oauth_issuer_trusted,
    },
];

pub const DEFER_CONDITIONS: &[Condition] = &[
    Condition {
        name: "container connectivity",
        reason: "Waiting to connect to admin-ui container",
        holds: |observed| observed.container_reachable,
    },
    Condition {
        name: "peer relation",
        reason: "Waiting for peer relation",
        holds: |observed| observed.peer_relation,
    },
    Condition {
        name: "openfga store",
        reason: "Waiting for openfga store",
        holds: |observed| observed.openfga.is_ready,
    },
    Condition {
        name: "database",
        reason: "Waiting for database creation",
        holds: |observed| observed.database.is_ready(),
    },
    Condition {
        name: "openfga model",
        reason: "Waiting for openfga model",
        holds: |observed| observed.openfga_model.is_ready(),
    },
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Proceed,
    Blocked(String),
    Deferred(String),
}

fn first_failure(conditions: &[Condition], observed: &Observed) -> Option<&'static str> {
    conditions
        .iter()
        .find(|condition| !(condition.holds)(observed))
        .map(|condition| {
            tracing::info!(condition = condition.name, "precondition not met");
            condition.reason
        })
}

pub fn evaluate(observed: &Observed) -> Outcome {
    if let Some(reason) = first_failure(BLOCK_CONDITIONS, observed) {
        return Outcome::Blocked(reason.to_string());
    }
    if let Some(reason) = first_failure(DEFER_CONDITIONS, observed) {
        return Outcome::Deferred(reason.to_string());
    }
    Outcome::Proceed
}
