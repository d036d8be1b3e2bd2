use std::collections::BTreeMap;

pub type EnvVars = BTreeMap<String, String>;

/// The full environment of the workload service before any integration is taken into account.
pub const DEFAULT_CONTAINER_ENV: &[(&str, &str)] = &[
    ("ACCESS_TOKEN_VERIFICATION_STRATEGY", ""),
    ("AUTHENTICATION_ENABLED", "false"),
    ("AUTHORIZATION_ENABLED", "false"),
    ("BASE_URL", ""),
    ("COOKIES_ENCRYPTION_KEY", ""),
    ("DEBUG", "false"),
    ("DSN", ""),
    ("HYDRA_ADMIN_URL", ""),
    ("IDP_CONFIGMAP_NAME", ""),
    ("IDP_CONFIGMAP_NAMESPACE", ""),
    ("KRATOS_ADMIN_URL", ""),
    ("KRATOS_PUBLIC_URL", ""),
    ("LOG_FILE", "/var/log/admin_ui.log"),
    ("LOG_LEVEL", "INFO"),
    ("MAIL_HOST", ""),
    ("MAIL_PASSWORD", ""),
    ("MAIL_PORT", ""),
    ("MAIL_USERNAME", ""),
    ("OATHKEEPER_PUBLIC_URL", ""),
    ("OAUTH2_CLIENT_ID", ""),
    ("OAUTH2_CLIENT_SECRET", ""),
    ("OAUTH2_CODEGRANT_SCOPES", "openid,email,profile,offline_access"),
    ("OAUTH2_REDIRECT_URI", ""),
    ("OIDC_ISSUER", ""),
    ("OPENFGA_API_HOST", ""),
    ("OPENFGA_API_SCHEME", ""),
    ("OPENFGA_API_TOKEN", ""),
    ("OPENFGA_AUTHORIZATION_MODEL_ID", ""),
    ("OPENFGA_STORE_ID", ""),
    ("OTEL_GRPC_ENDPOINT", ""),
    ("OTEL_HTTP_ENDPOINT", ""),
    ("PORT", "8080"),
    ("RULES_CONFIGMAP_FILE_NAME", ""),
    ("RULES_CONFIGMAP_NAME", ""),
    ("RULES_CONFIGMAP_NAMESPACE", ""),
    ("SCHEMAS_CONFIGMAP_NAME", ""),
    ("SCHEMAS_CONFIGMAP_NAMESPACE", ""),
    ("TRACING_ENABLED", "false"),
];

pub fn default_container_env() -> EnvVars {
    DEFAULT_CONTAINER_ENV
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub fn bool_env(value: bool) -> String {
    value.to_string()
}
