//! OTLP receivers offered by the tracing backend.

use serde::Deserialize;

use super::{remote_app_data, EnvVarConvertible, TRACING};
use crate::{
    env_vars::{bool_env, EnvVars},
    juju::{Databag, Model},
};

const OTLP_HTTP: &str = "otlp_http";
const OTLP_GRPC: &str = "otlp_grpc";

#[derive(Deserialize)]
struct Protocol {
    name: String,
}

#[derive(Deserialize)]
struct Receiver {
    protocol: Protocol,
    url: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TracingData {
    pub is_ready: bool,
    pub http_endpoint: String,
    pub grpc_endpoint: String,
}

impl TracingData {
    pub async fn load(model: &dyn Model) -> Self {
        remote_app_data(model, TRACING)
            .await
            .and_then(|(_, data)| Self::from_databag(&data))
            .unwrap_or_default()
    }

    pub fn from_databag(data: &Databag) -> Option<Self> {
        let receivers: Vec<Receiver> = match serde_json::from_str(data.get("receivers")?) {
            Ok(receivers) => receivers,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "ignoring malformed tracing receivers"
                );
                return None;
            }
        };
        let endpoint = |protocol: &str| {
            receivers
                .iter()
                .find(|receiver| receiver.protocol.name == protocol)
                .map(|receiver| receiver.url.clone())
                .unwrap_or_default()
        };
        let data = Self {
            is_ready: true,
            http_endpoint: endpoint(OTLP_HTTP),
            grpc_endpoint: endpoint(OTLP_GRPC),
        };
        (!data.http_endpoint.is_empty() || !data.grpc_endpoint.is_empty()).then_some(data)
    }

    /// The application data requesting OTLP receivers.
    pub fn receivers_request() -> Databag {
        Databag::from([(
            "receivers".to_string(),
            serde_json::Value::from(vec![OTLP_HTTP, OTLP_GRPC]).to_string(),
        )])
    }
}

impl EnvVarConvertible for TracingData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("TRACING_ENABLED".to_string(), bool_env(self.is_ready)),
            ("OTEL_HTTP_ENDPOINT".to_string(), self.http_endpoint.clone()),
            ("OTEL_GRPC_ENDPOINT".to_string(), self.grpc_endpoint.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn picks_endpoints_by_protocol() {
        let data = Databag::from([(
            "receivers".to_string(),
            indoc! {r#"
                [
                  {"protocol": {"name": "otlp_grpc", "type": "grpc"}, "url": "tempo:4317"},
                  {"protocol": {"name": "otlp_http", "type": "http"}, "url": "http://tempo:4318"}
                ]
            "#}
            .to_string(),
        )]);

        let env = TracingData::from_databag(&data).unwrap().to_env_vars();
        assert_eq!(env["TRACING_ENABLED"], "true");
        assert_eq!(env["OTEL_HTTP_ENDPOINT"], "http://tempo:4318");
        assert_eq!(env["OTEL_GRPC_ENDPOINT"], "tempo:4317");
    }

    #[test]
    fn no_known_receiver_means_disabled() {
        let data = Databag::from([("receivers".to_string(), "[]".to_string())]);
        assert_eq!(TracingData::from_databag(&data), None);
        assert_eq!(
            TracingData::default().to_env_vars()["TRACING_ENABLED"],
            "false"
        );
    }
}
