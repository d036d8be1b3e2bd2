use std::path::PathBuf;

use clap::Parser;
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use crate::{
    charm::Charm,
    juju::{event::DispatchContext, hook_tools::HookTools, pebble::PebbleClient, HookEvent},
    workload::{PebbleService, WORKLOAD_CONTAINER},
};

mod actions;
mod charm;
mod cli;
mod config;
mod env_vars;
mod guards;
mod integrations;
mod juju;
mod peer_data;
#[cfg(test)]
mod testing;
mod workload;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
    pub const TARGET_PLATFORM: Option<&str> = option_env!("TARGET");
}

/// Variable holding the `tracing` filter directives of the charm's own log output.
const LOG_ENV: &str = "ADMIN_UI_OPERATOR_LOG";

#[derive(Snafu, Debug)]
enum StartupError {
    #[snafu(display("failed to render the default workload layer"))]
    RenderLayer { source: serde_yaml::Error },

    #[snafu(display("failed to handle {event}"))]
    Dispatch {
        source: charm::Error,
        event: String,
    },
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Handle the hook or action the agent is dispatching.
    Dispatch(DispatchRun),

    /// Print the workload layer as rendered without any integration.
    PrintLayer,
}

#[derive(clap::Args)]
struct DispatchRun {
    #[clap(long, env = "JUJU_DISPATCH_PATH")]
    dispatch_path: String,

    #[clap(long, env = "JUJU_UNIT_NAME")]
    unit_name: String,

    #[clap(long, env = "JUJU_MODEL_NAME")]
    model_name: String,

    #[clap(long, env = "JUJU_MODEL_UUID")]
    model_uuid: String,

    #[clap(long, env = "JUJU_ACTION_NAME")]
    action_name: Option<String>,

    #[clap(long, env = "JUJU_RELATION_ID")]
    relation_id: Option<String>,

    #[clap(long, env = "JUJU_REMOTE_APP")]
    remote_app: Option<String>,

    #[clap(long, env = "JUJU_REMOTE_UNIT")]
    remote_unit: Option<String>,

    #[clap(long, env = "JUJU_WORKLOAD_NAME")]
    workload_name: Option<String>,

    /// Pebble socket of the workload container, as mounted into the charm container.
    #[clap(
        long,
        env = "ADMIN_UI_PEBBLE_SOCKET",
        default_value = "/charm/containers/admin-ui/pebble.socket"
    )]
    pebble_socket: PathBuf,

    /// Pebble client used to run commands in the workload container.
    #[clap(long, env = "ADMIN_UI_PEBBLE_BINARY", default_value = "/charm/bin/pebble")]
    pebble_binary: PathBuf,
}

impl DispatchRun {
    fn context(&self) -> DispatchContext {
        // the agent exports empty variables for values that do not apply to this hook
        let present = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());
        DispatchContext {
            dispatch_path: self.dispatch_path.clone(),
            action_name: present(&self.action_name),
            relation_id: present(&self.relation_id),
            remote_app: present(&self.remote_app),
            remote_unit: present(&self.remote_unit),
            workload_name: present(&self.workload_name),
        }
    }
}

fn initialize_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::PrintLayer => {
            let layer = PebbleService::render_layer(&[]);
            print!("{}", layer.to_yaml().context(RenderLayerSnafu)?);
        }
        Command::Dispatch(run) => {
            initialize_logging();
            tracing::info!(
                description = built_info::PKG_DESCRIPTION,
                version = built_info::PKG_VERSION,
                git_version = built_info::GIT_VERSION.unwrap_or("unknown"),
                target = built_info::TARGET_PLATFORM.unwrap_or("unknown target"),
                built_time = built_info::BUILT_TIME_UTC,
                rustc = built_info::RUSTC_VERSION,
                "starting charm"
            );

            let event = HookEvent::from_dispatch(&run.context());
            let model = HookTools::new(&run.unit_name, &run.model_name, &run.model_uuid);
            let container =
                PebbleClient::new(WORKLOAD_CONTAINER, run.pebble_socket, run.pebble_binary);
            let charm = Charm::new(&model, &container);
            if let Err(error) = charm.dispatch(event.clone()).await {
                tracing::error!(
                    category = error.category(),
                    error = &error as &dyn std::error::Error,
                    "failed to handle event"
                );
                return Err(error).context(DispatchSnafu {
                    event: event.name(),
                });
            }
        }
    }

    Ok(())
}
