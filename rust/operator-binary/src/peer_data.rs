//! Application-scoped key/value store kept in the peer relation's application data bag.
//!
//! Every unit may read it, only the leader writes it. Values are JSON-encoded.

use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::{
    env_vars::EnvVars,
    integrations::{first_relation, EnvVarConvertible, PEER},
    juju::{hook_tools, Databag, Member, Model, RelationId},
};

pub const COOKIE_ENCRYPTION_KEY: &str = "cookie_encryption_key";
const COOKIE_ENCRYPTION_KEY_LENGTH: usize = 32;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to check leadership"))]
    CheckLeadership { source: hook_tools::Error },

    #[snafu(display("failed to read peer data"))]
    ReadPeerData { source: hook_tools::Error },

    #[snafu(display("failed to write peer data key {key:?}"))]
    WritePeerData {
        source: hook_tools::Error,
        key: String,
    },

    #[snafu(display("failed to encode peer data key {key:?}"))]
    EncodePeerData {
        source: serde_json::Error,
        key: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct PeerData<'a> {
    model: &'a dyn Model,
}

impl<'a> PeerData<'a> {
    pub fn new(model: &'a dyn Model) -> Self {
        Self { model }
    }

    fn own_app(&self) -> Member {
        Member::App(self.model.app_name().to_string())
    }

    /// Returns the value stored under `key`, or `null` when the peer relation or the key is absent.
    pub async fn get(&self, key: &str) -> Value {
        let Some(relation) = first_relation(self.model, PEER).await else {
            return Value::Null;
        };
        let data = match self.model.relation_get(&relation, &self.own_app()).await {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(
                    key,
                    error = &error as &dyn std::error::Error,
                    "failed to read peer data"
                );
                return Value::Null;
            }
        };
        decode(key, data.get(key))
    }

    /// The relation to write to, or `None` when this unit must not write.
    async fn writable_relation(&self, key: &str) -> Result<Option<RelationId>> {
        if !self.model.is_leader().await.context(CheckLeadershipSnafu)? {
            tracing::info!(key, "refusing to write peer data on a non-leader unit");
            return Ok(None);
        }
        let relation = first_relation(self.model, PEER).await;
        if relation.is_none() {
            tracing::info!(key, "peer relation is not ready, not writing peer data");
        }
        Ok(relation)
    }

    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let Some(relation) = self.writable_relation(key).await? else {
            return Ok(());
        };
        let encoded = serde_json::to_string(value).with_context(|_| EncodePeerDataSnafu { key })?;
        self.model
            .relation_set(&relation, true, &Databag::from([(key.to_string(), encoded)]))
            .await
            .with_context(|_| WritePeerDataSnafu { key })
    }

    /// Removes `key`, returning what it held.
    pub async fn pop(&self, key: &str) -> Result<Value> {
        let Some(relation) = self.writable_relation(key).await? else {
            return Ok(Value::Null);
        };
        let data = self
            .model
            .relation_get(&relation, &self.own_app())
            .await
            .context(ReadPeerDataSnafu)?;
        let Some(raw) = data.get(key) else {
            return Ok(Value::Null);
        };
        self.model
            .relation_set(&relation, true, &Databag::from([(key.to_string(), String::new())]))
            .await
            .with_context(|_| WritePeerDataSnafu { key })?;
        Ok(decode(key, Some(raw)))
    }
}

fn decode(key: &str, raw: Option<&String>) -> Value {
    match raw.filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|error| {
            tracing::warn!(
                key,
                error = &error as &dyn std::error::Error,
                "ignoring peer data that is not JSON"
            );
            Value::Null
        }),
        None => Value::Null,
    }
}

pub fn generate_cookie_encryption_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COOKIE_ENCRYPTION_KEY_LENGTH)
        .map(char::from)
        .collect()
}

/// The symmetric key the workload encrypts its session cookies with.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CookieEncryptionKey(pub String);

impl EnvVarConvertible for CookieEncryptionKey {
    fn to_env_vars(&self) -> EnvVars {
        EnvVars::from([("COOKIES_ENCRYPTION_KEY".to_string(), self.0.clone())])
    }
}
