//! A view of the [`Model`] in which one relation no longer exists.
//!
//! While a `relation-broken` hook runs, the agent still lists the relation being torn down.
//! Handlers of that hook must see the world as it will be once the hook completes.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{hook_tools, Databag, Member, Model, RelationId, UnitStatus};

pub struct WithoutRelation<'a> {
    inner: &'a dyn Model,
    hidden: Option<RelationId>,
}

impl<'a> WithoutRelation<'a> {
    /// Hides `hidden` from relation listings, or nothing when `hidden` is `None`.
    pub fn new(inner: &'a dyn Model, hidden: Option<RelationId>) -> Self {
        Self { inner, hidden }
    }
}

#[async_trait]
impl Model for WithoutRelation<'_> {
    fn app_name(&self) -> &str {
        self.inner.app_name()
    }

    fn unit_name(&self) -> &str {
        self.inner.unit_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn model_uuid(&self) -> &str {
        self.inner.model_uuid()
    }

    async fn is_leader(&self) -> Result<bool, hook_tools::Error> {
        self.inner.is_leader().await
    }

    async fn relation_ids(&self, endpoint: &str) -> Result<Vec<RelationId>, hook_tools::Error> {
        let mut relations = self.inner.relation_ids(endpoint).await?;
        if let Some(hidden) = &self.hidden {
            relations.retain(|relation| relation != hidden);
        }
        Ok(relations)
    }

    async fn relation_units(
        &self,
        relation: &RelationId,
    ) -> Result<Vec<String>, hook_tools::Error> {
        self.inner.relation_units(relation).await
    }

    async fn relation_remote_app(
        &self,
        relation: &RelationId,
    ) -> Result<Option<String>, hook_tools::Error> {
        self.inner.relation_remote_app(relation).await
    }

    async fn relation_get(
        &self,
        relation: &RelationId,
        member: &Member,
    ) -> Result<Databag, hook_tools::Error> {
        self.inner.relation_get(relation, member).await
    }

    async fn relation_set(
        &self,
        relation: &RelationId,
        app_scope: bool,
        data: &Databag,
    ) -> Result<(), hook_tools::Error> {
        self.inner.relation_set(relation, app_scope, data).await
    }

    async fn config(&self) -> Result<Map<String, Value>, hook_tools::Error> {
        self.inner.config().await
    }

    async fn secret_get(&self, id: &str) -> Result<Databag, hook_tools::Error> {
        self.inner.secret_get(id).await
    }

    async fn status_set(&self, status: &UnitStatus) -> Result<(), hook_tools::Error> {
        self.inner.status_set(status).await
    }

    async fn application_version_set(&self, version: &str) -> Result<(), hook_tools::Error> {
        self.inner.application_version_set(version).await
    }

    async fn open_port(&self, protocol: &str, port: u16) -> Result<(), hook_tools::Error> {
        self.inner.open_port(protocol, port).await
    }

    async fn state_get(&self, key: &str) -> Result<Option<String>, hook_tools::Error> {
        self.inner.state_get(key).await
    }

    async fn state_set(&self, key: &str, value: &str) -> Result<(), hook_tools::Error> {
        self.inner.state_set(key, value).await
    }

    async fn action_get(&self) -> Result<Value, hook_tools::Error> {
        self.inner.action_get().await
    }

    async fn action_set(&self, results: &Databag) -> Result<(), hook_tools::Error> {
        self.inner.action_set(results).await
    }

    async fn action_fail(&self, message: &str) -> Result<(), hook_tools::Error> {
        self.inner.action_fail(message).await
    }

    async fn action_log(&self, message: &str) -> Result<(), hook_tools::Error> {
        self.inner.action_log(message).await
    }
}
