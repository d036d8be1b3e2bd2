//! Charm configuration, as set by the operator with `juju config`.

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::{
    env_vars::{bool_env, EnvVars},
    integrations::EnvVarConvertible,
    juju::{hook_tools, Model},
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read charm config"))]
    ReadConfig { source: hook_tools::Error },

    #[snafu(display("failed to parse charm config"))]
    ParseConfig { source: serde_json::Error },
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CharmConfig {
    pub log_level: String,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl CharmConfig {
    pub async fn load(model: &dyn Model) -> Result<Self, Error> {
        let config = model.config().await.context(ReadConfigSnafu)?;
        serde_json::from_value(serde_json::Value::Object(config)).context(ParseConfigSnafu)
    }
}

impl EnvVarConvertible for CharmConfig {
    fn to_env_vars(&self) -> EnvVars {
        let log_level = self.log_level.to_uppercase();
        EnvVars::from([
            ("DEBUG".to_string(), bool_env(log_level == "DEBUG")),
            ("LOG_LEVEL".to_string(), log_level),
        ])
    }
}
