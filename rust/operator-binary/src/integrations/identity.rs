//! Endpoints of the identity services the admin UI manages: Kratos, Hydra and Oathkeeper.

use super::{
    non_empty, remote_app_data, EnvVarConvertible, HYDRA_ENDPOINT_INFO, KRATOS_INFO,
    OATHKEEPER_INFO,
};
use crate::{
    env_vars::EnvVars,
    juju::{Databag, Model},
    workload::RULES_CONFIGMAP_FILE_NAME,
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KratosData {
    pub admin_url: String,
    pub public_url: String,
    pub idp_configmap_name: String,
    pub idp_configmap_namespace: String,
    pub schemas_configmap_name: String,
    pub schemas_configmap_namespace: String,
}

impl KratosData {
    pub async fn load(model: &dyn Model) -> Self {
        remote_app_data(model, KRATOS_INFO)
            .await
            .and_then(|(_, data)| Self::from_databag(&data))
            .unwrap_or_default()
    }

    pub fn from_databag(data: &Databag) -> Option<Self> {
        let (Some(admin_url), Some(public_url)) = (
            non_empty(data, "admin_endpoint"),
            non_empty(data, "public_endpoint"),
        ) else {
            tracing::warn!("kratos-info data is missing its endpoints");
            return None;
        };
        let namespace = data.get("configmaps_namespace").cloned().unwrap_or_default();
        Some(Self {
            admin_url,
            public_url,
            idp_configmap_name: data
                .get("providers_configmap_name")
                .cloned()
                .unwrap_or_default(),
            idp_configmap_namespace: namespace.clone(),
            schemas_configmap_name: data
                .get("schemas_configmap_name")
                .cloned()
                .unwrap_or_default(),
            schemas_configmap_namespace: namespace,
        })
    }
}

impl EnvVarConvertible for KratosData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([
            ("KRATOS_ADMIN_URL".to_string(), self.admin_url.clone()),
            ("KRATOS_PUBLIC_URL".to_string(), self.public_url.clone()),
            ("IDP_CONFIGMAP_NAME".to_string(), self.idp_configmap_name.clone()),
            (
                "IDP_CONFIGMAP_NAMESPACE".to_string(),
                self.idp_configmap_namespace.clone(),
            ),
            (
                "SCHEMAS_CONFIGMAP_NAME".to_string(),
                self.schemas_configmap_name.clone(),
            ),
            (
                "SCHEMAS_CONFIGMAP_NAMESPACE".to_string(),
                self.schemas_configmap_namespace.clone(),
            ),
        ])
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HydraData {
    pub admin_url: String,
}

impl HydraData {
    pub async fn load(model: &dyn Model) -> Self {
        remote_app_data(model, HYDRA_ENDPOINT_INFO)
            .await
            .and_then(|(_, data)| Self::from_databag(&data))
            .unwrap_or_default()
    }

    pub fn from_databag(data: &Databag) -> Option<Self> {
        let Some(admin_url) = non_empty(data, "admin_endpoint") else {
            tracing::warn!("hydra-endpoint-info data is missing the admin endpoint");
            return None;
        };
        Some(Self { admin_url })
    }
}

impl EnvVarConvertible for HydraData {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([("HYDRA_ADMIN_URL".to_string(), self.admin_url.clone())])
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OathkeeperData {
    pub is_ready: bool,
    pub public_url: String,
    pub rules_configmap_name: String,
    pub rules_configmap_namespace: String,
}

impl OathkeeperData {
    pub async fn load(model: &dyn Model) -> Self {
        remote_app_data(model, OATHKEEPER_INFO)
            .await
            .and_then(|(_, data)| Self::from_databag(&data))
            .unwrap_or_default()
    }

    pub fn from_databag(data: &Databag) -> Option<Self> {
        let Some(public_url) = non_empty(data, "public_endpoint") else {
            tracing::warn!("oathkeeper-info data is missing the public endpoint");
            return None;
        };
        Some(Self {
            is_ready: true,
            public_url,
            rules_configmap_name: data
                .get("rules_configmap_name")
                .cloned()
                .unwrap_or_default(),
            rules_configmap_namespace: data
                .get("configmaps_namespace")
                .cloned()
                .unwrap_or_default(),
        })
    }
}

impl EnvVarConvertible for OathkeeperData {
    fn to_env_vars(&self) -> EnvVars {
        let rules_file = if self.is_ready {
            RULES_CONFIGMAP_FILE_NAME
        } else {
            ""
        };
        EnvVars::from([
            ("OATHKEEPER_PUBLIC_URL".to_string(), self.public_url.clone()),
            (
                "RULES_CONFIGMAP_NAME".to_string(),
                self.rules_configmap_name.clone(),
            ),
            (
                "RULES_CONFIGMAP_NAMESPACE".to_string(),
                self.rules_configmap_namespace.clone(),
            ),
            ("RULES_CONFIGMAP_FILE_NAME".to_string(), rules_file.to_string()),
        ])
    }
}
