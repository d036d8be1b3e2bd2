//! The OpenFGA store the admin UI authorizes against, and the authorization model created in it.

use serde_json::{json, Value};
use url::{Position, Url};

use super::{inline_or_secret, non_empty, remote_app_data, EnvVarConvertible, OPENFGA};
use crate::{
    env_vars::{bool_env, EnvVars},
    juju::{Databag, Model},
    peer_data::PeerData,
};

/// Store requested from OpenFGA on behalf of this application.
pub const OPENFGA_STORE_NAME: &str = "identity-platform-admin-ui-store";

const MODEL_ID_KEY: &str = "authorization_model_id";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OpenFgaIntegrationData {
    pub is_ready: bool,
    pub url: String,
    pub api_token: String,
    pub store_id: String,
}

impl OpenFgaIntegrationData {
    pub async fn load(model: &dyn Model) -> Self {
        let Some((_, data)) = remote_app_data(model, OPENFGA).await else {
            return Self::default();
        };
        let api_token = inline_or_secret(model, &data, "token", "token_secret_id", "token").await;
        Self::from_parts(&data, api_token).unwrap_or_default()
    }

    fn from_parts(data: &Databag, api_token: Option<String>) -> Option<Self> {
        let Some(store_id) = non_empty(data, "store_id") else {
            tracing::info!("openfga store has not been created yet");
            return None;
        };
        let (Some(url), Some(api_token)) = (non_empty(data, "http_api_url"), api_token) else {
            tracing::warn!("openfga data is missing the api url or token");
            return None;
        };
        Some(Self {
            is_ready: true,
            url,
            api_token,
            store_id,
        })
    }

    /// The application data requesting a store.
    pub fn store_request() -> Databag {
        Databag::from([("store_name".to_string(), OPENFGA_STORE_NAME.to_string())])
    }

    pub fn api_scheme(&self) -> String {
        Url::parse(&self.url)
            .map(|url| url.scheme().to_string())
            .unwrap_or_default()
    }

    /// `host[:port]` of the API url.
    pub fn api_host(&self) -> String {
        Url::parse(&self.url)
            .map(|url| url[Position::BeforeHost..Position::AfterPort].to_string())
            .unwrap_or_default()
    }
}

impl EnvVarConvertible for OpenFgaIntegrationData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("AUTHORIZATION_ENABLED".to_string(), bool_env(self.is_ready)),
            ("OPENFGA_STORE_ID".to_string(), self.store_id.clone()),
            ("OPENFGA_API_TOKEN".to_string(), self.api_token.clone()),
            ("OPENFGA_API_SCHEME".to_string(), self.api_scheme()),
            ("OPENFGA_API_HOST".to_string(), self.api_host()),
        ])
    }
}

/// The authorization model created for one workload version.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OpenFgaModelData {
    pub model_id: String,
}

impl OpenFgaModelData {
    /// Reads the model recorded for `version`, if the version is known.
    pub async fn load(peer_data: &PeerData<'_>, version: Option<&str>) -> Self {
        match version {
            Some(version) => Self::from_peer_record(&peer_data.get(version).await),
            None => Self::default(),
        }
    }

    pub fn from_peer_record(record: &Value) -> Self {
        Self {
            model_id: record
                .get(MODEL_ID_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn to_peer_record(&self) -> Value {
        json!({ MODEL_ID_KEY: self.model_id })
    }

    pub fn is_ready(&self) -> bool {
        !self.model_id.is_empty()
    }
}

impl EnvVarConvertible for OpenFgaModelData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([(
            "OPENFGA_AUTHORIZATION_MODEL_ID".to_string(),
            self.model_id.clone(),
        )])
    }
}
