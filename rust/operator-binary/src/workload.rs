//! The admin UI service running in the workload container, and the Pebble layer that runs it.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};

use crate::{
    cli::{self, CommandLine},
    env_vars::default_container_env,
    integrations::{EnvVarConvertible, OpenFgaIntegrationData},
    juju::{
        hook_tools,
        layer::{Check, HttpCheck, Service},
        pebble, Container, Layer, Model,
    },
};

pub const WORKLOAD_CONTAINER: &str = "admin-ui";
pub const WORKLOAD_SERVICE: &str = "admin-ui";
pub const ADMIN_UI_COMMAND: &str = "identity-platform-admin-ui serve";
pub const ADMIN_UI_PORT: u16 = 8080;
pub const LOG_DIR: &str = "/var/log";
pub const CA_BUNDLE_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";
pub const RULES_CONFIGMAP_FILE_NAME: &str = "admin_ui_rules.json";
pub const OAUTH_CALLBACK_PATH: &str = "api/v0/auth/callback";
const LAYER_SUMMARY: &str = "Pebble Layer for Identity Platform Admin UI";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to open port {port}"))]
    OpenPort {
        source: hook_tools::Error,
        port: u16,
    },

    #[snafu(display("failed to prepare directory {path:?}"))]
    PrepareDirectory {
        source: pebble::Error,
        path: String,
    },

    #[snafu(display("failed to push ca certificates"))]
    PushCaCertificates { source: pebble::Error },

    #[snafu(display("failed to add the workload layer"))]
    AddLayer { source: pebble::Error },

    #[snafu(display("failed to replan the workload"))]
    Replan { source: pebble::Error },

    #[snafu(display("failed to create the authorization model"))]
    CreateAuthorizationModel { source: cli::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct WorkloadService<'a> {
    model: &'a dyn Model,
    container: &'a dyn Container,
}

impl<'a> WorkloadService<'a> {
    pub fn new(model: &'a dyn Model, container: &'a dyn Container) -> Self {
        Self { model, container }
    }

    /// The version reported by the workload binary, `None` if it cannot be determined right now.
    pub async fn version(&self) -> Option<String> {
        match CommandLine::new(self.container).version().await {
            Ok(version) => version,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to fetch the workload version"
                );
                None
            }
        }
    }

    /// Publishes the workload version on the application.
    pub async fn set_version(&self, version: &str) {
        if version.is_empty() {
            return;
        }
        if let Err(error) = self.model.application_version_set(version).await {
            tracing::error!(
                version,
                error = &error as &dyn std::error::Error,
                "failed to set the workload version"
            );
        }
    }

    pub async fn open_port(&self) -> Result<()> {
        self.model
            .open_port("tcp", ADMIN_UI_PORT)
            .await
            .context(OpenPortSnafu {
                port: ADMIN_UI_PORT,
            })
    }

    pub async fn prepare_dir(&self, path: &str) -> Result<()> {
        let exists = self
            .container
            .is_dir(path)
            .await
            .with_context(|_| PrepareDirectorySnafu { path })?;
        if exists {
            return Ok(());
        }
        self.container
            .make_dir(path, true)
            .await
            .with_context(|_| PrepareDirectorySnafu { path })
    }

    pub async fn push_ca_certs(&self, bundle: &str) -> Result<()> {
        self.container
            .push(CA_BUNDLE_PATH, bundle.as_bytes(), true)
            .await
            .context(PushCaCertificatesSnafu)
    }

    /// Removes the pushed CA bundle. A bundle that is already gone is not an error.
    pub async fn remove_ca_certs(&self) {
        match self.container.remove_path(CA_BUNDLE_PATH).await {
            Ok(()) | Err(pebble::Error::Api { status: 404, .. }) => {}
            Err(error) => tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to remove ca certificates"
            ),
        }
    }

    /// Creates an authorization model in the OpenFGA store, returning its id.
    pub async fn create_openfga_model(
        &self,
        openfga: &OpenFgaIntegrationData,
    ) -> Result<Option<String>> {
        CommandLine::new(self.container)
            .create_openfga_model(&openfga.url, &openfga.api_token, &openfga.store_id)
            .await
            .context(CreateAuthorizationModelSnafu)
    }

    pub async fn is_running(&self) -> bool {
        match self.container.service_is_running(WORKLOAD_SERVICE).await {
            Ok(running) => running,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to query the workload service"
                );
                false
            }
        }
    }
}

pub struct PebbleService<'a> {
    container: &'a dyn Container,
}

impl<'a> PebbleService<'a> {
    pub fn new(container: &'a dyn Container) -> Self {
        Self { container }
    }

    /// Renders the workload layer. Later sources override earlier ones, and all of them
    /// override the defaults, so every default key is always present.
    pub fn render_layer(sources: &[&dyn EnvVarConvertible]) -> Layer {
        let mut environment = default_container_env();
        for source in sources {
            environment.extend(source.to_env_vars());
        }

        Layer {
            summary: LAYER_SUMMARY.to_string(),
            description: LAYER_SUMMARY.to_string(),
            services: BTreeMap::from([(
                WORKLOAD_SERVICE.to_string(),
                Service {
                    summary: "identity platform admin ui".to_string(),
                    command: ADMIN_UI_COMMAND.to_string(),
                    environment,
                    ..Service::default()
                },
            )]),
            checks: BTreeMap::from([(
                "alive".to_string(),
                Check {
                    http: Some(HttpCheck {
                        url: format!("http://localhost:{ADMIN_UI_PORT}/api/v0/status"),
                    }),
                    ..Check::default()
                },
            )]),
        }
    }

    /// Adds `layer` on top of the current plan and restarts whatever it changed.
    pub async fn plan(&self, layer: &Layer) -> Result<()> {
        self.container
            .add_layer(WORKLOAD_CONTAINER, layer, true)
            .await
            .context(AddLayerSnafu)?;
        self.container.replan().await.context(ReplanSnafu)
    }
}
