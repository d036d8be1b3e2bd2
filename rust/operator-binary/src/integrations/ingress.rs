//! The public URL handed out by the ingress provider.

use serde::Deserialize;

use super::{remote_app_data, EnvVarConvertible, INGRESS};
use crate::{
    env_vars::EnvVars,
    juju::{Databag, Model},
    workload::{ADMIN_UI_PORT, OAUTH_CALLBACK_PATH},
};

#[derive(Deserialize)]
struct IngressUrl {
    url: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IngressData {
    pub is_ready: bool,
    /// The ingress URL when ready, the unit's cluster-internal URL otherwise.
    pub url: String,
}

impl IngressData {
    pub async fn load(model: &dyn Model) -> Self {
        let ingress_url = remote_app_data(model, INGRESS)
            .await
            .and_then(|(_, data)| Self::ingress_url(&data));
        match ingress_url {
            Some(url) => Self { is_ready: true, url },
            None => Self {
                is_ready: false,
                url: internal_url(model),
            },
        }
    }

    fn ingress_url(data: &Databag) -> Option<String> {
        let raw = data.get("ingress")?;
        match serde_json::from_str::<IngressUrl>(raw) {
            Ok(ingress) if !ingress.url.is_empty() => Some(ingress.url),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "ignoring malformed ingress data"
                );
                None
            }
        }
    }

    /// Where the OAuth provider sends users back to after login.
    pub fn redirect_uri(&self) -> String {
        format!("{}/{OAUTH_CALLBACK_PATH}", self.url.trim_end_matches('/'))
    }

    /// The application data requesting a route to this application.
    pub fn ingress_request(model: &dyn Model) -> Databag {
        Databag::from([
            ("model".to_string(), json_string(model.model_name())),
            ("name".to_string(), json_string(model.app_name())),
            ("port".to_string(), ADMIN_UI_PORT.to_string()),
            ("strip-prefix".to_string(), "true".to_string()),
            ("redirect-https".to_string(), "false".to_string()),
        ])
    }

    /// The unit data telling the provider where this unit can be reached.
    pub fn unit_request(model: &dyn Model) -> Databag {
        Databag::from([("host".to_string(), json_string(&unit_fqdn(model)))])
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

pub(crate) fn unit_fqdn(model: &dyn Model) -> String {
    format!(
        "{unit}.{app}-endpoints.{namespace}.svc.cluster.local",
        unit = model.unit_name().replace('/', "-"),
        app = model.app_name(),
        namespace = model.model_name(),
    )
}

fn internal_url(model: &dyn Model) -> String {
    format!("http://{}:{ADMIN_UI_PORT}", unit_fqdn(model))
}

impl EnvVarConvertible for IngressData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("BASE_URL".to_string(), self.url.clone()),
            ("OAUTH2_REDIRECT_URI".to_string(), self.redirect_uri()),
        ])
    }
}
