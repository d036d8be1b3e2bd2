//! Scrape jobs offered to Prometheus over `metrics-endpoint`.

use serde_json::json;

use super::ingress::unit_fqdn;
use crate::{
    juju::{Databag, Model},
    workload::ADMIN_UI_PORT,
};

pub const CHARM_NAME: &str = "identity-platform-admin-ui";
pub const METRICS_PATH: &str = "/api/v0/metrics";

/// The application data describing where every unit of this application exposes metrics.
pub fn scrape_request(model: &dyn Model) -> Databag {
    let metadata = json!({
        "model": model.model_name(),
        "model_uuid": model.model_uuid(),
        "application": model.app_name(),
        "charm_name": CHARM_NAME,
    });
    let jobs = json!([{
        "metrics_path": METRICS_PATH,
        "static_configs": [{ "targets": [format!("*:{ADMIN_UI_PORT}")] }],
    }]);
    Databag::from([
        ("scrape_metadata".to_string(), metadata.to_string()),
        ("scrape_jobs".to_string(), jobs.to_string()),
    ])
}

/// The unit data the wildcard target of [`scrape_request`] resolves against.
pub fn unit_scrape_request(model: &dyn Model) -> Databag {
    Databag::from([
        ("prometheus_scrape_unit_address".to_string(), unit_fqdn(model)),
        (
            "prometheus_scrape_unit_name".to_string(),
            model.unit_name().to_string(),
        ),
    ])
}
