//! Event dispatch and the holistic reconciliation of the admin UI workload.

use futures::join;
use serde_json::{json, Value};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    actions::{self, Action, ActionRunner},
    cli::{CommandLine, MIGRATION_TIMEOUT},
    config::{self, CharmConfig},
    guards::{self, Observed, Outcome, MIGRATION_PENDING_ON_FOLLOWER},
    integrations::{
        metrics, oauth::issuer_trusted, publish_app_data, publish_unit_data, relation_exists,
        CaBundle, DatabaseConfig, HydraData, IngressData, KratosData, OAuthProviderData,
        OathkeeperData, OpenFgaIntegrationData, OpenFgaModelData, SmtpData, TracingData,
        CERTIFICATE_TRANSFER, DATABASE, HYDRA_ENDPOINT_INFO, INGRESS, KRATOS_INFO,
        METRICS_ENDPOINT, OATHKEEPER_INFO, OAUTH, OPENFGA, PEER, SMTP, TRACING,
    },
    juju::{
        event, hook_tools, Container, DeferredEvents, HookEvent, Layer, Model, RelationEventKind,
        RelationId, UnitStatus, WithoutRelation,
    },
    peer_data::{
        self, generate_cookie_encryption_key, CookieEncryptionKey, PeerData, COOKIE_ENCRYPTION_KEY,
    },
    workload::{self, PebbleService, WorkloadService, LOG_DIR, WORKLOAD_CONTAINER},
};

const COOKIE_KEY_PENDING_ON_FOLLOWER: &str =
    "Waiting for leader unit to generate the cookie encryption key";
const MIGRATION_FAILED: &str = "Database migration failed, please consult the logs";
const REPLAN_FAILED: &str = "Failed to replan, please consult the logs";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to check leadership"))]
    CheckLeadership { source: hook_tools::Error },

    #[snafu(display("failed to load the charm config"))]
    LoadConfig { source: config::Error },

    #[snafu(display("failed to set unit status to {status}"))]
    SetStatus {
        source: hook_tools::Error,
        status: UnitStatus,
    },

    #[snafu(display("failed to access peer data"))]
    AccessPeerData { source: peer_data::Error },

    #[snafu(display("failed to open the workload port"))]
    OpenPort { source: workload::Error },

    #[snafu(display("failed to prepare the log directory"))]
    PrepareLogDirectory { source: workload::Error },

    #[snafu(display("failed to push the ca certificates"))]
    PushCaCertificates { source: workload::Error },

    #[snafu(display("failed to apply the workload layer"))]
    ApplyLayer { source: workload::Error },

    #[snafu(display("failed to run action {action}"))]
    RunAction {
        source: actions::Error,
        action: Action,
    },

    #[snafu(display("failed to store deferred events"))]
    StoreDeferredEvents { source: event::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

/// How a reconciliation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Reconciliation {
    /// The layer was applied.
    Reconciled(Layer),
    /// An operator has to act; the event is dropped.
    Blocked(String),
    /// Something is not ready yet; the event is queued again.
    Deferred(String),
    /// A one-time step failed; the next event retries it.
    Aborted,
}

/// Whether an event is done with or has to be delivered again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Disposition {
    Handled,
    Deferred,
}

impl From<&Reconciliation> for Disposition {
    fn from(reconciliation: &Reconciliation) -> Self {
        match reconciliation {
            Reconciliation::Deferred(_) => Disposition::Deferred,
            _ => Disposition::Handled,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum EventFilter {
    PebbleReady(&'static str),
    ConfigChanged,
    UpgradeCharm,
    LeaderElected,
    Relation {
        endpoint: &'static str,
        kinds: &'static [RelationEventKind],
    },
    Action(Action),
}

impl EventFilter {
    fn matches(&self, event: &HookEvent) -> bool {
        match (self, event) {
            (EventFilter::PebbleReady(wanted), HookEvent::PebbleReady { container }) => {
                container == wanted
            }
            (EventFilter::ConfigChanged, HookEvent::ConfigChanged)
            | (EventFilter::UpgradeCharm, HookEvent::UpgradeCharm)
            | (EventFilter::LeaderElected, HookEvent::LeaderElected) => true,
            (
                EventFilter::Relation { endpoint, kinds },
                HookEvent::Relation { kind, relation, .. },
            ) => relation.endpoint == *endpoint && kinds.contains(kind),
            (EventFilter::Action(action), HookEvent::Action { name }) => {
                action.to_string() == *name
            }
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Handler {
    PebbleReady,
    Reconcile,
    CreateOpenFgaModel,
    ForgetOpenFgaModel,
    RemoveCaCertificates,
    Action(Action),
}

struct Subscription {
    filter: EventFilter,
    handler: Handler,
}

const CHANGED_OR_BROKEN: &[RelationEventKind] =
    &[RelationEventKind::Changed, RelationEventKind::Broken];
const CREATED_OR_CHANGED: &[RelationEventKind] =
    &[RelationEventKind::Created, RelationEventKind::Changed];
const CHANGED: &[RelationEventKind] = &[RelationEventKind::Changed];
const BROKEN: &[RelationEventKind] = &[RelationEventKind::Broken];

pub struct Charm<'a> {
    model: &'a dyn Model,
    container: &'a dyn Container,
    subscriptions: Vec<Subscription>,
}

impl<'a> Charm<'a> {
    pub fn new(model: &'a dyn Model, container: &'a dyn Container) -> Self {
        let subscribe = |filter: EventFilter, handler: Handler| Subscription { filter, handler };
        let relation = |endpoint: &'static str, kinds: &'static [RelationEventKind]| {
            EventFilter::Relation { endpoint, kinds }
        };

        let mut subscriptions = vec![
            subscribe(
                EventFilter::PebbleReady(WORKLOAD_CONTAINER),
                Handler::PebbleReady,
            ),
            subscribe(EventFilter::ConfigChanged, Handler::Reconcile),
            subscribe(EventFilter::UpgradeCharm, Handler::CreateOpenFgaModel),
            subscribe(EventFilter::LeaderElected, Handler::CreateOpenFgaModel),
            subscribe(relation(PEER, CREATED_OR_CHANGED), Handler::Reconcile),
            subscribe(relation(OPENFGA, CHANGED), Handler::CreateOpenFgaModel),
            subscribe(relation(OPENFGA, BROKEN), Handler::ForgetOpenFgaModel),
            subscribe(
                relation(CERTIFICATE_TRANSFER, CHANGED),
                Handler::Reconcile,
            ),
            subscribe(
                relation(CERTIFICATE_TRANSFER, BROKEN),
                Handler::RemoveCaCertificates,
            ),
        ];
        for endpoint in [
            KRATOS_INFO,
            HYDRA_ENDPOINT_INFO,
            OATHKEEPER_INFO,
            INGRESS,
            OAUTH,
            SMTP,
            DATABASE,
            TRACING,
        ] {
            subscriptions.push(subscribe(
                relation(endpoint, CHANGED_OR_BROKEN),
                Handler::Reconcile,
            ));
        }
        for action in [
            Action::CreateIdentity,
            Action::RunMigrationUp,
            Action::RunMigrationDown,
            Action::RunMigrationStatus,
        ] {
            subscriptions.push(subscribe(EventFilter::Action(action), Handler::Action(action)));
        }

        Self {
            model,
            container,
            subscriptions,
        }
    }

    /// Handles `event`, after re-delivering whatever earlier dispatches deferred.
    pub async fn dispatch(&self, event: HookEvent) -> Result<()> {
        tracing::info!(event = event.name(), "dispatching event");
        let model = WithoutRelation::new(self.model, broken_relation(&event));
        publish_requests(&model).await;

        let mut deferred = DeferredEvents::load(self.model).await;
        if !event.is_action() {
            for earlier in deferred.take() {
                tracing::debug!(event = earlier.name(), "re-delivering deferred event");
                if self.handle(&earlier).await? == Disposition::Deferred {
                    deferred.push(earlier);
                }
            }
        }
        if self.handle(&event).await? == Disposition::Deferred {
            deferred.push(event);
        }
        deferred
            .store(self.model)
            .await
            .context(StoreDeferredEventsSnafu)
    }

    async fn handle(&self, event: &HookEvent) -> Result<Disposition> {
        let Some(handler) = self
            .subscriptions
            .iter()
            .find(|subscription| subscription.filter.matches(event))
            .map(|subscription| subscription.handler)
        else {
            tracing::debug!(event = event.name(), "no handler subscribed");
            return Ok(Disposition::Handled);
        };
        tracing::debug!(event = event.name(), ?handler, "handling event");

        let model = WithoutRelation::new(self.model, broken_relation(event));
        let reconciler = Reconciler::new(&model, self.container);
        let reconciliation = match handler {
            Handler::PebbleReady => {
                let workload = WorkloadService::new(&model, self.container);
                workload.open_port().await.context(OpenPortSnafu)?;
                if let Some(version) = workload.version().await {
                    workload.set_version(&version).await;
                }
                reconciler.reconcile().await?
            }
            Handler::Reconcile => reconciler.reconcile().await?,
            Handler::CreateOpenFgaModel => {
                reconciler.create_openfga_model().await?;
                reconciler.reconcile().await?
            }
            Handler::ForgetOpenFgaModel => {
                reconciler.forget_openfga_model().await?;
                reconciler.reconcile().await?
            }
            Handler::RemoveCaCertificates => {
                WorkloadService::new(&model, self.container)
                    .remove_ca_certs()
                    .await;
                reconciler.reconcile().await?
            }
            Handler::Action(action) => {
                ActionRunner::new(&model, self.container)
                    .run(action)
                    .await
                    .context(RunActionSnafu { action })?;
                return Ok(Disposition::Handled);
            }
        };
        Ok(Disposition::from(&reconciliation))
    }
}

fn broken_relation(event: &HookEvent) -> Option<RelationId> {
    match event {
        HookEvent::Relation {
            kind: RelationEventKind::Broken,
            relation,
            ..
        } => Some(relation.clone()),
        _ => None,
    }
}

/// Keeps the requests this application makes of its providers up to date.
///
/// Failures are logged and retried on the next dispatch.
async fn publish_requests(model: &dyn Model) {
    let unit_requests = [
        (INGRESS, IngressData::unit_request(model)),
        (METRICS_ENDPOINT, metrics::unit_scrape_request(model)),
    ];
    for (endpoint, request) in &unit_requests {
        if let Err(error) = publish_unit_data(model, endpoint, request).await {
            tracing::warn!(
                endpoint,
                error = &error as &dyn std::error::Error,
                "failed to publish unit request"
            );
        }
    }

    match model.is_leader().await {
        Ok(true) => {}
        Ok(false) => return,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to check leadership, not publishing requests"
            );
            return;
        }
    }
    let (ingress, database, oauth) = join!(
        IngressData::load(model),
        DatabaseConfig::load(model),
        OAuthProviderData::load(model),
    );
    let requests = [
        (OPENFGA, OpenFgaIntegrationData::store_request()),
        (DATABASE, database.database_request()),
        (INGRESS, IngressData::ingress_request(model)),
        (OAUTH, oauth.client_config(&ingress.redirect_uri())),
        (TRACING, TracingData::receivers_request()),
        (METRICS_ENDPOINT, metrics::scrape_request(model)),
    ];
    for (endpoint, request) in &requests {
        if let Err(error) = publish_app_data(model, endpoint, request).await {
            tracing::warn!(
                endpoint,
                error = &error as &dyn std::error::Error,
                "failed to publish application request"
            );
        }
    }
}

/// Drives the workload towards the state described by the current integrations.
pub struct Reconciler<'a> {
    model: &'a dyn Model,
    container: &'a dyn Container,
}

impl<'a> Reconciler<'a> {
    pub fn new(model: &'a dyn Model, container: &'a dyn Container) -> Self {
        Self { model, container }
    }

    fn workload(&self) -> WorkloadService<'a> {
        WorkloadService::new(self.model, self.container)
    }

    async fn set_status(&self, status: UnitStatus) -> Result<()> {
        tracing::debug!(%status, message = status.message(), "setting unit status");
        self.model
            .status_set(&status)
            .await
            .with_context(|_| SetStatusSnafu { status })
    }

    async fn observe(&self) -> Result<Observed> {
        let model = self.model;
        let leader = model.is_leader().await.context(CheckLeadershipSnafu)?;
        let config = CharmConfig::load(model).await.context(LoadConfigSnafu)?;
        let container_reachable = self.container.can_connect().await;
        let workload_version = if container_reachable {
            self.workload().version().await
        } else {
            None
        };

        let (
            peer_relation,
            kratos_relation,
            hydra_relation,
            openfga_relation,
            database_relation,
            ingress_relation,
            oauth_relation,
            ca_relation,
        ) = join!(
            relation_exists(model, PEER),
            relation_exists(model, KRATOS_INFO),
            relation_exists(model, HYDRA_ENDPOINT_INFO),
            relation_exists(model, OPENFGA),
            relation_exists(model, DATABASE),
            relation_exists(model, INGRESS),
            relation_exists(model, OAUTH),
            relation_exists(model, CERTIFICATE_TRANSFER),
        );
        let (
            kratos,
            hydra,
            oathkeeper,
            openfga,
            ingress,
            oauth,
            ca_bundle,
            smtp,
            database,
            tracing,
        ) = join!(
            KratosData::load(model),
            HydraData::load(model),
            OathkeeperData::load(model),
            OpenFgaIntegrationData::load(model),
            IngressData::load(model),
            OAuthProviderData::load(model),
            CaBundle::load(model),
            SmtpData::load(model),
            DatabaseConfig::load(model),
            TracingData::load(model),
        );
        let openfga_model =
            OpenFgaModelData::load(&PeerData::new(model), workload_version.as_deref()).await;
        let oauth_issuer_trusted = if oauth.is_ready && ca_bundle.is_ready() {
            issuer_trusted(&oauth.issuer_url, &ca_bundle.bundle()).await
        } else {
            true
        };

        Ok(Observed {
            leader,
            container_reachable,
            workload_version,
            peer_relation,
            kratos_relation,
            hydra_relation,
            openfga_relation,
            database_relation,
            ingress_relation,
            oauth_relation,
            ca_relation,
            config,
            kratos,
            hydra,
            oathkeeper,
            openfga,
            openfga_model,
            ingress,
            oauth,
            ca_bundle,
            smtp,
            database,
            tracing,
            oauth_issuer_trusted,
        })
    }

    /// Observes everything, then applies the layer the observation calls for.
    pub async fn reconcile(&self) -> Result<Reconciliation> {
        let observed = self.observe().await?;
        match guards::evaluate(&observed) {
            Outcome::Proceed => {}
            Outcome::Blocked(reason) => {
                self.set_status(UnitStatus::Blocked(reason.clone())).await?;
                return Ok(Reconciliation::Blocked(reason));
            }
            Outcome::Deferred(reason) => return self.defer(reason).await,
        }
        let Some(version) = observed.workload_version.as_deref() else {
            return self.defer("Waiting for the workload version".to_string()).await;
        };

        self.set_status(UnitStatus::Maintenance(
            "Configuring the container".to_string(),
        ))
        .await?;
        let peer_data = PeerData::new(self.model);
        let Some(cookie_key) = self.cookie_encryption_key(&peer_data, observed.leader).await?
        else {
            return self.defer(COOKIE_KEY_PENDING_ON_FOLLOWER.to_string()).await;
        };

        let workload = self.workload();
        workload
            .prepare_dir(LOG_DIR)
            .await
            .context(PrepareLogDirectorySnafu)?;
        if observed.ca_bundle.is_ready() {
            workload
                .push_ca_certs(&observed.ca_bundle.bundle())
                .await
                .context(PushCaCertificatesSnafu)?;
        }

        let migration_key = &observed.database.migration_version_key;
        if peer_data.get(migration_key).await.as_str() != Some(version) {
            if !observed.leader {
                return self.defer(MIGRATION_PENDING_ON_FOLLOWER.to_string()).await;
            }
            let migrated = CommandLine::new(self.container)
                .migrate_up(&observed.database.dsn(), MIGRATION_TIMEOUT)
                .await;
            if let Err(error) = migrated {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "automatic database migration failed"
                );
                self.set_status(UnitStatus::Blocked(MIGRATION_FAILED.to_string()))
                    .await?;
                return Ok(Reconciliation::Aborted);
            }
            peer_data
                .set(migration_key, &json!(version))
                .await
                .context(AccessPeerDataSnafu)?;
        }

        let layer = PebbleService::render_layer(&[
            &observed.config,
            &observed.kratos,
            &observed.hydra,
            &observed.oathkeeper,
            &observed.openfga,
            &observed.openfga_model,
            &observed.ingress,
            &observed.oauth,
            &observed.smtp,
            &observed.database,
            &observed.tracing,
            &cookie_key,
        ]);
        if let Err(error) = PebbleService::new(self.container).plan(&layer).await {
            self.set_status(UnitStatus::Blocked(REPLAN_FAILED.to_string()))
                .await?;
            return Err(error).context(ApplyLayerSnafu);
        }

        workload.set_version(version).await;
        self.set_status(UnitStatus::Active).await?;
        Ok(Reconciliation::Reconciled(layer))
    }

    async fn defer(&self, reason: String) -> Result<Reconciliation> {
        self.set_status(UnitStatus::Waiting(reason.clone())).await?;
        Ok(Reconciliation::Deferred(reason))
    }

    /// The stored cookie key. The leader generates it when missing; other units get `None`.
    async fn cookie_encryption_key(
        &self,
        peer_data: &PeerData<'_>,
        leader: bool,
    ) -> Result<Option<CookieEncryptionKey>> {
        if let Value::String(key) = peer_data.get(COOKIE_ENCRYPTION_KEY).await {
            if !key.is_empty() {
                return Ok(Some(CookieEncryptionKey(key)));
            }
        }
        if !leader {
            return Ok(None);
        }
        let key = generate_cookie_encryption_key();
        peer_data
            .set(COOKIE_ENCRYPTION_KEY, &Value::String(key.clone()))
            .await
            .context(AccessPeerDataSnafu)?;
        Ok(Some(CookieEncryptionKey(key)))
    }

    /// Creates the authorization model of the running workload version, unless it exists already.
    ///
    /// Only the leader creates models. A failure is logged and leaves the model missing, which
    /// the following reconciliation waits on.
    pub async fn create_openfga_model(&self) -> Result<()> {
        if !self.model.is_leader().await.context(CheckLeadershipSnafu)? {
            return Ok(());
        }
        let openfga = OpenFgaIntegrationData::load(self.model).await;
        if !openfga.is_ready || !self.container.can_connect().await {
            tracing::info!("openfga store or workload not ready, not creating a model");
            return Ok(());
        }
        let workload = self.workload();
        let Some(version) = workload.version().await else {
            return Ok(());
        };
        let peer_data = PeerData::new(self.model);
        if OpenFgaModelData::load(&peer_data, Some(&version))
            .await
            .is_ready()
        {
            return Ok(());
        }

        match workload.create_openfga_model(&openfga).await {
            Ok(Some(model_id)) => {
                tracing::info!(%version, %model_id, "created authorization model");
                peer_data
                    .set(&version, &OpenFgaModelData { model_id }.to_peer_record())
                    .await
                    .context(AccessPeerDataSnafu)
            }
            Ok(None) => Ok(()),
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to create the authorization model"
                );
                Ok(())
            }
        }
    }

    /// Drops the authorization model recorded for the running workload version.
    pub async fn forget_openfga_model(&self) -> Result<()> {
        if !self.model.is_leader().await.context(CheckLeadershipSnafu)? {
            return Ok(());
        }
        if !self.container.can_connect().await {
            tracing::warn!(
                "workload not reachable, keeping the authorization model of the running version"
            );
            return Ok(());
        }
        if let Some(version) = self.workload().version().await {
            let removed = PeerData::new(self.model)
                .pop(&version)
                .await
                .context(AccessPeerDataSnafu)?;
            tracing::info!(%version, %removed, "forgot authorization model");
        }
        Ok(())
    }
}
