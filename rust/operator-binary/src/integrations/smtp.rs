//! The SMTP relay used to send invitation and recovery mails.

use super::{inline_or_secret, non_empty, remote_app_data, EnvVarConvertible, SMTP};
use crate::{
    env_vars::EnvVars,
    juju::{Databag, Model},
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SmtpData {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl SmtpData {
    pub async fn load(model: &dyn Model) -> Self {
        let Some((_, data)) = remote_app_data(model, SMTP).await else {
            return Self::default();
        };
        let password = inline_or_secret(model, &data, "password", "password_id", "password").await;
        Self::from_parts(&data, password).unwrap_or_default()
    }

    fn from_parts(data: &Databag, password: Option<String>) -> Option<Self> {
        let Some(host) = non_empty(data, "host") else {
            tracing::warn!("smtp data is missing the host");
            return None;
        };
        let port = match data.get("port").map(|port| port.parse::<u16>()) {
            Some(Ok(port)) => Some(port),
            Some(Err(error)) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "smtp data has an invalid port"
                );
                return None;
            }
            None => None,
        };
        Some(Self {
            host,
            port,
            username: data.get("user").cloned().unwrap_or_default(),
            password: password.unwrap_or_default(),
        })
    }
}

impl EnvVarConvertible for SmtpData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("MAIL_HOST".to_string(), self.host.clone()),
            (
                "MAIL_PORT".to_string(),
                self.port.map(|port| port.to_string()).unwrap_or_default(),
            ),
            ("MAIL_USERNAME".to_string(), self.username.clone()),
            ("MAIL_PASSWORD".to_string(), self.password.clone()),
        ])
    }
}
