//! Present/absent reconciliation of a single resource.
//!
//! The reconciler looks the resource up by its identity, then creates,
//! recreates, deletes or updates it so that the remote state matches the
//! desired state. Resource kinds plug in as data: a [`ResourceKind`]
//! descriptor plus the creation strategies it supports.

pub mod domain;
pub mod image;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::clients::ResourceClient;
use crate::error::{ReconcileError, ReconcileFailure};
use crate::filter::FilterPredicate;
use crate::kind::ResourceKind;
use crate::poll::wait_for_status;
use crate::state::{ActionLog, Attributes, DesiredState, Existence, RemoteResource};
use crate::update::apply_updates;

/// One way of creating a resource, selected by a creation-source field.
#[async_trait]
pub trait CreationStrategy: Send + Sync {
    /// The attribute whose presence selects this strategy.
    fn source_field(&self) -> &'static str;

    /// Create the resource. The reconciler registers the creation itself;
    /// `actions` is only for remote side effects a strategy leaves behind
    /// when it fails midway.
    async fn create(
        &self,
        client: &dyn ResourceClient,
        kind: &ResourceKind,
        desired: &DesiredState,
        actions: &mut ActionLog,
    ) -> Result<RemoteResource, ReconcileError>;
}

/// A resource kind together with the ways it can be created.
pub struct ResourceDefinition {
    pub kind: ResourceKind,
    pub strategies: Vec<Box<dyn CreationStrategy>>,
}

impl ResourceDefinition {
    /// The single strategy whose source field is set in `desired`.
    fn strategy_for(&self, desired: &DesiredState) -> Result<&dyn CreationStrategy, ReconcileError> {
        let mut selected = self
            .strategies
            .iter()
            .filter(|s| desired.get(s.source_field()).is_some());

        match (selected.next(), selected.next()) {
            (Some(strategy), None) => Ok(strategy.as_ref()),
            (None, _) => Err(ReconcileError::configuration(
                self.kind.name,
                desired.identity(),
                format!("no creation handler found for {}", self.kind.name),
            )),
            (Some(first), Some(second)) => Err(ReconcileError::configuration(
                self.kind.name,
                desired.identity(),
                format!(
                    "conflicting creation sources: {} and {}",
                    first.source_field(),
                    second.source_field()
                ),
            )),
        }
    }
}

/// Successful reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub actions: ActionLog,
    /// Final snapshot. For a deleted resource, its last snapshot before
    /// deletion. `None` if the resource did not exist.
    pub resource: Option<RemoteResource>,
}

/// Drives one resource toward its desired state.
pub struct Reconciler {
    client: Arc<dyn ResourceClient>,
    definition: ResourceDefinition,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ResourceClient>, definition: ResourceDefinition) -> Self {
        Self { client, definition }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.definition.kind
    }

    /// Reconcile `desired`. Actions performed before a failure are returned
    /// alongside the error.
    pub async fn reconcile(
        &self,
        desired: &DesiredState,
    ) -> Result<Reconciliation, ReconcileFailure> {
        let mut actions = ActionLog::new();
        info!(
            "Reconciling {} {} ({:?})",
            self.kind().name,
            desired.identity(),
            desired.existence
        );

        let result = match desired.existence {
            Existence::Present => self.ensure_present(desired, &mut actions).await.map(Some),
            Existence::Absent => self.ensure_absent(desired, &mut actions).await,
        };

        match result {
            Ok(resource) => Ok(Reconciliation { actions, resource }),
            Err(error) => Err(ReconcileFailure { actions, error }),
        }
    }

    /// Find the resource matching `criteria`.
    ///
    /// `id` is read directly since the API cannot filter on it; any other
    /// criterion must be filterable for the kind. The first match wins.
    pub async fn lookup(
        &self,
        criteria: &Attributes,
    ) -> Result<Option<RemoteResource>, ReconcileError> {
        let kind = self.kind();
        let identity = criteria
            .values()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/");

        if let Some(field) = criteria
            .keys()
            .find(|k| k.as_str() != "id" && !kind.is_filterable(k))
        {
            return Err(ReconcileError::configuration(
                kind.name,
                identity,
                format!("{} is not a filterable field of {}", field, kind.name),
            ));
        }

        if let Some(id) = criteria.get("id") {
            return match self.client.get(kind, &id.to_string()).await {
                Ok(resource) => Ok(Some(resource)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(ReconcileError::remote("get", kind.name, identity, e)),
            };
        }

        let filter = FilterPredicate::from_attributes(criteria);
        debug!("Looking up {} where {}", kind.name, filter);
        let found = self
            .client
            .find(kind, &filter)
            .await
            .map_err(|e| ReconcileError::remote("get", kind.name, identity, e))?;
        Ok(found.into_iter().next())
    }

    /// Lookup criteria for `desired`. An empty filter would match an arbitrary
    /// resource of the kind, so at least one identity attribute must be set.
    fn identity_criteria(&self, desired: &DesiredState) -> Result<Attributes, ReconcileError> {
        let criteria = desired.identity_criteria();
        if criteria.is_empty() {
            return Err(ReconcileError::configuration(
                self.kind().name,
                desired.identity(),
                format!(
                    "none of the identity attributes {} is set",
                    desired.identity_keys.join(", ")
                ),
            ));
        }
        Ok(criteria)
    }

    async fn ensure_absent(
        &self,
        desired: &DesiredState,
        actions: &mut ActionLog,
    ) -> Result<Option<RemoteResource>, ReconcileError> {
        let kind = self.kind();
        let identity = desired.identity();

        let Some(existing) = self.lookup(&self.identity_criteria(desired)?).await? else {
            debug!("{} {} does not exist", kind.name, identity);
            return Ok(None);
        };

        self.delete(&existing, &identity, actions).await?;
        Ok(Some(existing))
    }

    async fn ensure_present(
        &self,
        desired: &DesiredState,
        actions: &mut ActionLog,
    ) -> Result<RemoteResource, ReconcileError> {
        let kind = self.kind();
        let identity = desired.identity();
        let client = self.client.as_ref();

        let mut existing = self.lookup(&self.identity_criteria(desired)?).await?;

        if desired.recreate {
            if let Some(resource) = existing.take() {
                self.delete(&resource, &identity, actions).await?;
            }
        }

        let id = match existing {
            Some(resource) => resource.id,
            None => {
                let strategy = self.definition.strategy_for(desired)?;
                let created = strategy.create(client, kind, desired, actions).await?;
                info!("Created {} {} ({})", kind.name, identity, created.id);
                actions.register(format!("Created {} {}", kind.name, identity));

                if let Some(policy) = &desired.wait {
                    wait_for_status(client, kind, &created, &identity, policy).await?;
                }
                created.id
            }
        };

        // Creation responses can be partially populated; diff against a fresh read.
        let mut resource = client
            .get(kind, &id)
            .await
            .map_err(|e| ReconcileError::remote("get", kind.name, identity.as_str(), e))?;

        let updated = apply_updates(
            client,
            kind,
            &mut resource,
            &identity,
            &desired.attributes,
            &desired.mutable_attributes,
            actions,
        )
        .await?;

        if updated {
            resource = client
                .get(kind, &id)
                .await
                .map_err(|e| ReconcileError::remote("get", kind.name, identity.as_str(), e))?;
        }

        Ok(resource)
    }

    async fn delete(
        &self,
        resource: &RemoteResource,
        identity: &str,
        actions: &mut ActionLog,
    ) -> Result<(), ReconcileError> {
        let kind = self.kind();
        self.client
            .delete(kind, &resource.id)
            .await
            .map_err(|e| ReconcileError::remote("delete", kind.name, identity, e))?;

        info!("Deleted {} {} ({})", kind.name, identity, resource.id);
        actions.register(format!("Deleted {} {}", kind.name, identity));
        Ok(())
    }
}
