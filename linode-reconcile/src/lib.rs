//! linode-reconcile: declarative present/absent reconciliation of Linode resources.
//!
//! Given a desired state, the [`Reconciler`] looks up the remote resource,
//! creates, recreates, deletes or updates it, optionally waits for it to
//! reach a status, and reports every change it made in an [`ActionLog`].

pub mod clients;
pub mod error;
pub mod filter;
pub mod kind;
pub mod poll;
pub mod reconciler;
pub mod state;
pub mod update;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use clients::{LinodeClient, LinodeConfig, ResourceClient};
pub use error::{ClientError, ReconcileError, ReconcileFailure};
pub use filter::FilterPredicate;
pub use kind::{ResourceKind, DOMAIN, IMAGE};
pub use reconciler::{CreationStrategy, Reconciler, Reconciliation, ResourceDefinition};
pub use state::{ActionLog, Attributes, DesiredState, Existence, RemoteResource, Value, WaitPolicy};
