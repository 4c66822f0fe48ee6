//! Clients for the remote resource API.
//!
//! The reconciler only talks to the API through [`ResourceClient`]:
//! - `LinodeClient`: the Linode REST API (auth, pagination, rate-limit retry)
//! - `MemoryClient` (test utility): an in-memory remote store

pub mod linode;

pub use linode::{LinodeClient, LinodeConfig};

use async_trait::async_trait;

use crate::error::ClientError;
use crate::filter::FilterPredicate;
use crate::kind::ResourceKind;
use crate::state::{Attributes, RemoteResource};

/// Typed CRUD access to remote resources plus raw passthrough calls.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List resources of a kind matching the predicate, in API order.
    async fn find(
        &self,
        kind: &ResourceKind,
        filter: &FilterPredicate,
    ) -> Result<Vec<RemoteResource>, ClientError>;

    /// Read a single resource. Fails with `ClientError::NotFound` if absent.
    async fn get(&self, kind: &ResourceKind, id: &str) -> Result<RemoteResource, ClientError>;

    async fn create(
        &self,
        kind: &ResourceKind,
        attributes: &Attributes,
    ) -> Result<RemoteResource, ClientError>;

    async fn update(
        &self,
        kind: &ResourceKind,
        id: &str,
        changes: &Attributes,
    ) -> Result<(), ClientError>;

    async fn delete(&self, kind: &ResourceKind, id: &str) -> Result<(), ClientError>;

    /// POST an arbitrary JSON body to a path below the API base URL.
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError>;

    /// GET every page of an arbitrary collection path below the API base URL.
    async fn list(&self, path: &str) -> Result<Vec<serde_json::Value>, ClientError>;

    /// Stream a file to an out-of-band upload URL.
    async fn raw_upload(
        &self,
        url: &str,
        file: tokio::fs::File,
        len: u64,
    ) -> Result<(), ClientError>;
}
