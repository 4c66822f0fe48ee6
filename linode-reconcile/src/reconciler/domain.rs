//! Domain reconciliation - DNS domains are created directly from their attributes.

use async_trait::async_trait;
use tracing::info;

use super::{CreationStrategy, ResourceDefinition};
use crate::clients::ResourceClient;
use crate::error::ReconcileError;
use crate::kind::{ResourceKind, DOMAIN};
use crate::state::{ActionLog, DesiredState, RemoteResource, Value};

pub const DEFAULT_TYPE: &str = "master";

pub fn definition() -> ResourceDefinition {
    ResourceDefinition {
        kind: DOMAIN,
        strategies: vec![Box::new(FromAttributes)],
    }
}

/// Create a domain from all desired attributes.
pub struct FromAttributes;

#[async_trait]
impl CreationStrategy for FromAttributes {
    fn source_field(&self) -> &'static str {
        "domain"
    }

    async fn create(
        &self,
        client: &dyn ResourceClient,
        kind: &ResourceKind,
        desired: &DesiredState,
        _actions: &mut ActionLog,
    ) -> Result<RemoteResource, ReconcileError> {
        let identity = desired.identity();
        let mut body = desired.attributes.clone();
        body.entry("type".to_string())
            .or_insert_with(|| Value::from(DEFAULT_TYPE));

        info!("Creating {} {}", kind.name, identity);
        client
            .create(kind, &body)
            .await
            .map_err(|e| ReconcileError::remote("create", kind.name, identity, e))
    }
}

/// All records of a domain in API order.
pub async fn records(
    client: &dyn ResourceClient,
    domain: &RemoteResource,
) -> Result<Vec<serde_json::Value>, ReconcileError> {
    let path = format!("{}/records", DOMAIN.resource_path(&domain.id));
    client.list(&path).await.map_err(|e| {
        ReconcileError::remote(
            "list records of",
            DOMAIN.name,
            domain
                .get("domain")
                .map(ToString::to_string)
                .unwrap_or_else(|| domain.id.clone()),
            e,
        )
    })
}
