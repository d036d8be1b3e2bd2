//! The OAuth client registered with the identity provider, and whether its issuer is trusted.

use std::time::Duration;

use snafu::{ResultExt, Snafu};

use super::{inline_or_secret, non_empty, remote_app_data, EnvVarConvertible, OAUTH};
use crate::{
    env_vars::{bool_env, EnvVars},
    juju::{Databag, Model},
};

pub const OAUTH_SCOPES: &str = "openid,email,profile,offline_access";
const OAUTH_GRANT_TYPES: [&str; 2] = ["authorization_code", "refresh_token"];
const OPENID_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";
const TRUST_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to parse ca certificates"))]
    ParseCaBundle { source: reqwest::Error },

    #[snafu(display("failed to build http client"))]
    BuildHttpClient { source: reqwest::Error },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OAuthProviderData {
    pub is_ready: bool,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub jwt_access_token: bool,
}

impl OAuthProviderData {
    pub async fn load(model: &dyn Model) -> Self {
        let Some((_, data)) = remote_app_data(model, OAUTH).await else {
            return Self::default();
        };
        let client_secret =
            inline_or_secret(model, &data, "client_secret", "client_secret_id", "secret").await;
        Self::from_parts(&data, client_secret).unwrap_or_default()
    }

    fn from_parts(data: &Databag, client_secret: Option<String>) -> Option<Self> {
        let (Some(issuer_url), Some(client_id), Some(client_secret)) = (
            non_empty(data, "issuer_url"),
            non_empty(data, "client_id"),
            client_secret,
        ) else {
            tracing::info!("oauth client has not been registered yet");
            return None;
        };
        Some(Self {
            is_ready: true,
            issuer_url,
            client_id,
            client_secret,
            jwt_access_token: data
                .get("jwt_access_token")
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
        })
    }

    fn verification_strategy(&self) -> &'static str {
        match (self.is_ready, self.jwt_access_token) {
            (false, _) => "",
            (true, true) => "jwks",
            (true, false) => "userinfo",
        }
    }

    /// The application data registering this application as an OAuth client.
    pub fn client_config(&self, redirect_uri: &str) -> Databag {
        let audience: Vec<&str> = if self.client_id.is_empty() {
            Vec::new()
        } else {
            vec![self.client_id.as_str()]
        };
        Databag::from([
            ("redirect_uri".to_string(), redirect_uri.to_string()),
            ("scope".to_string(), OAUTH_SCOPES.replace(',', " ")),
            (
                "grant_types".to_string(),
                serde_json::Value::from(OAUTH_GRANT_TYPES.to_vec()).to_string(),
            ),
            (
                "audience".to_string(),
                serde_json::Value::from(audience).to_string(),
            ),
            (
                "token_endpoint_auth_method".to_string(),
                "client_secret_basic".to_string(),
            ),
        ])
    }
}

impl EnvVarConvertible for OAuthProviderData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("AUTHENTICATION_ENABLED".to_string(), bool_env(self.is_ready)),
            ("OIDC_ISSUER".to_string(), self.issuer_url.clone()),
            ("OAUTH2_CLIENT_ID".to_string(), self.client_id.clone()),
            ("OAUTH2_CLIENT_SECRET".to_string(), self.client_secret.clone()),
            ("OAUTH2_CODEGRANT_SCOPES".to_string(), OAUTH_SCOPES.to_string()),
            (
                "ACCESS_TOKEN_VERIFICATION_STRATEGY".to_string(),
                self.verification_strategy().to_string(),
            ),
        ])
    }
}

fn openid_configuration_url(issuer_url: &str) -> String {
    format!(
        "{}/{OPENID_CONFIGURATION_PATH}",
        issuer_url.trim_end_matches('/')
    )
}

fn trusting_client(ca_bundle: &str) -> Result<reqwest::Client, Error> {
    reqwest::Certificate::from_pem_bundle(ca_bundle.as_bytes())
        .context(ParseCaBundleSnafu)?
        .into_iter()
        .fold(
            reqwest::Client::builder()
                .timeout(TRUST_CHECK_TIMEOUT)
                .tls_built_in_root_certs(false),
            reqwest::ClientBuilder::add_root_certificate,
        )
        .build()
        .context(BuildHttpClientSnafu)
}

fn unverified_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(TRUST_CHECK_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .context(BuildHttpClientSnafu)
}

/// How a request for the discovery document ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Attempt {
    Answered,
    ConnectFailed,
    OtherFailure,
}

impl Attempt {
    fn of(result: reqwest::Result<reqwest::Response>, url: &str) -> Self {
        match result {
            Ok(_) => Self::Answered,
            Err(error) if error.is_connect() => {
                tracing::debug!(
                    url,
                    error = &error as &dyn std::error::Error,
                    "could not connect to the oauth provider"
                );
                Self::ConnectFailed
            }
            Err(error) => {
                tracing::info!(
                    url,
                    error = &error as &dyn std::error::Error,
                    "oauth provider trust could not be determined"
                );
                Self::OtherFailure
            }
        }
    }
}

/// A connection refused with the received certificates but accepted without verification means
/// the certificate was rejected. Every other combination leaves trust undetermined.
fn trust_verdict(verified: Attempt, unverified: Attempt) -> bool {
    !(verified == Attempt::ConnectFailed && unverified == Attempt::Answered)
}

/// Checks that the issuer's discovery document can be fetched when only `ca_bundle` is trusted.
///
/// Only a rejected certificate counts as untrusted; an issuer that is down or answers with an
/// error status is a different problem and does not block the charm.
pub async fn issuer_trusted(issuer_url: &str, ca_bundle: &str) -> bool {
    if !issuer_url.starts_with("https://") {
        return true;
    }
    let client = match trusting_client(ca_bundle) {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "cannot verify the oauth provider with the received ca certificates"
            );
            return false;
        }
    };
    let url = openid_configuration_url(issuer_url);
    let verified = Attempt::of(client.get(&url).send().await, &url);
    if verified != Attempt::ConnectFailed {
        return true;
    }

    let unverified = match unverified_client() {
        Ok(client) => Attempt::of(client.get(&url).send().await, &url),
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "cannot tell a rejected certificate from an unreachable oauth provider"
            );
            Attempt::OtherFailure
        }
    };
    let trusted = trust_verdict(verified, unverified);
    if !trusted {
        tracing::warn!(url, "oauth provider is not trusted");
    }
    trusted
}
