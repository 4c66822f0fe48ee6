//! In-memory remote store for tests.
//!
//! `MemoryClient` behaves like the Linode API closely enough to drive the
//! reconciler: it assigns ids, serves filtered listings, accepts uploads and
//! can replay scripted status transitions or inject failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::clients::ResourceClient;
use crate::error::ClientError;
use crate::filter::FilterPredicate;
use crate::kind::{ResourceKind, DOMAIN, IMAGE};
use crate::state::{attributes_to_json, Attributes, RemoteResource};

/// Number of calls made per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub find: usize,
    pub get: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub post: usize,
    pub upload: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Find,
    Get,
    Create,
    Update,
    Delete,
    Post,
    Upload,
}

/// A completed raw upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub url: String,
    pub bytes: Vec<u8>,
}

struct Collection {
    name: &'static str,
    initial_status: Option<String>,
    items: BTreeMap<String, serde_json::Value>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<&'static str, Collection>,
    next_id: u64,
    calls: CallCounts,
    updates: Vec<Attributes>,
    uploads: Vec<Upload>,
    failures: HashMap<FailOn, ClientError>,
    status_scripts: HashMap<String, VecDeque<String>>,
    lists: HashMap<String, Vec<serde_json::Value>>,
    post_responses: HashMap<String, serde_json::Value>,
    get_delay: Option<Duration>,
}

/// An in-memory implementation of [`ResourceClient`].
pub struct MemoryClient {
    inner: Mutex<Inner>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// A store that knows about images and domains.
    pub fn new() -> Self {
        let client = Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
        };
        client.register(&IMAGE, Some("creating"));
        client.register(&DOMAIN, Some("active"));
        client
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a collection. Newly created resources get `initial_status`.
    pub fn register(&self, kind: &ResourceKind, initial_status: Option<&str>) {
        self.lock().collections.insert(
            kind.endpoint,
            Collection {
                name: kind.name,
                initial_status: initial_status.map(str::to_string),
                items: BTreeMap::new(),
            },
        );
    }

    /// Insert a resource directly, bypassing call counters. Returns its id.
    pub fn seed(&self, kind: &ResourceKind, body: serde_json::Value) -> String {
        let mut inner = self.lock();
        let id = match body.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                let id = inner.next_id.to_string();
                inner.next_id += 1;
                id
            }
        };
        let mut body = body;
        if let Some(object) = body.as_object_mut() {
            object.insert("id".to_string(), json!(id));
        }
        if let Some(collection) = inner.collections.get_mut(kind.endpoint) {
            collection.items.insert(id.clone(), body);
        }
        id
    }

    /// Raw stored body of a resource.
    pub fn stored(&self, kind: &ResourceKind, id: &str) -> Option<serde_json::Value> {
        self.lock()
            .collections
            .get(kind.endpoint)
            .and_then(|c| c.items.get(id).cloned())
    }

    pub fn count(&self, kind: &ResourceKind) -> usize {
        self.lock()
            .collections
            .get(kind.endpoint)
            .map(|c| c.items.len())
            .unwrap_or(0)
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    /// Bodies of every successful update call, in order.
    pub fn updates(&self) -> Vec<Attributes> {
        self.lock().updates.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.lock().uploads.clone()
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: FailOn, error: ClientError) {
        self.lock().failures.insert(op, error);
    }

    /// Statuses reported by successive `get` calls for `id`. The last one
    /// sticks once the script is exhausted.
    pub fn script_status<I, S>(&self, id: &str, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().status_scripts.insert(
            id.to_string(),
            statuses.into_iter().map(Into::into).collect(),
        );
    }

    /// Items served by `list` for an arbitrary path, e.g. domain records.
    pub fn set_list(&self, path: &str, items: Vec<serde_json::Value>) {
        self.lock().lists.insert(path.to_string(), items);
    }

    /// Body returned by `post` for `path` instead of the built-in behavior.
    pub fn set_post_response(&self, path: &str, body: serde_json::Value) {
        self.lock().post_responses.insert(path.to_string(), body);
    }

    /// Make every `get` take `delay` before it answers.
    pub fn delay_get(&self, delay: Duration) {
        self.lock().get_delay = Some(delay);
    }

    fn take_failure(inner: &mut Inner, op: FailOn) -> Result<(), ClientError> {
        match inner.failures.remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn collection<'a>(
        inner: &'a mut Inner,
        endpoint: &str,
    ) -> Result<&'a mut Collection, ClientError> {
        inner
            .collections
            .get_mut(endpoint)
            .ok_or_else(|| ClientError::NotFound(endpoint.to_string()))
    }

    fn insert(inner: &mut Inner, endpoint: &str, body: serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let id = inner.next_id.to_string();
        inner.next_id += 1;

        let collection = Self::collection(inner, endpoint)?;
        let mut body = body;
        if let Some(object) = body.as_object_mut() {
            object.insert("id".to_string(), json!(id));
            if let Some(status) = &collection.initial_status {
                object
                    .entry("status")
                    .or_insert_with(|| json!(status));
            }
        }
        collection.items.insert(id, body.clone());
        Ok(body)
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn find(
        &self,
        kind: &ResourceKind,
        filter: &FilterPredicate,
    ) -> Result<Vec<RemoteResource>, ClientError> {
        let mut inner = self.lock();
        inner.calls.find += 1;
        Self::take_failure(&mut inner, FailOn::Find)?;

        let collection = Self::collection(&mut inner, kind.endpoint)?;
        let mut found = Vec::new();
        for raw in collection.items.values() {
            let resource = RemoteResource::from_json(kind.name, raw.clone())?;
            if filter.matches(&resource.attributes) {
                found.push(resource);
            }
        }
        Ok(found)
    }

    async fn get(&self, kind: &ResourceKind, id: &str) -> Result<RemoteResource, ClientError> {
        let delay = self.lock().get_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        inner.calls.get += 1;
        Self::take_failure(&mut inner, FailOn::Get)?;

        let next_status = match inner.status_scripts.get_mut(id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };

        let collection = Self::collection(&mut inner, kind.endpoint)?;
        let raw = collection
            .items
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(kind.resource_path(id)))?;
        if let (Some(status), Some(object)) = (next_status, raw.as_object_mut()) {
            object.insert("status".to_string(), json!(status));
        }
        RemoteResource::from_json(kind.name, raw.clone())
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        attributes: &Attributes,
    ) -> Result<RemoteResource, ClientError> {
        let mut inner = self.lock();
        inner.calls.create += 1;
        Self::take_failure(&mut inner, FailOn::Create)?;

        let body = Self::insert(&mut inner, kind.endpoint, attributes_to_json(attributes))?;
        RemoteResource::from_json(kind.name, body)
    }

    async fn update(
        &self,
        kind: &ResourceKind,
        id: &str,
        changes: &Attributes,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.calls.update += 1;
        Self::take_failure(&mut inner, FailOn::Update)?;

        let collection = Self::collection(&mut inner, kind.endpoint)?;
        let raw = collection
            .items
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(kind.resource_path(id)))?;
        if let Some(object) = raw.as_object_mut() {
            for (key, value) in changes {
                object.insert(key.clone(), value.to_json());
            }
        }
        inner.updates.push(changes.clone());
        Ok(())
    }

    async fn delete(&self, kind: &ResourceKind, id: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.calls.delete += 1;
        Self::take_failure(&mut inner, FailOn::Delete)?;

        let collection = Self::collection(&mut inner, kind.endpoint)?;
        collection
            .items
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(kind.resource_path(id)))
    }

    /// Responses set with `set_post_response` win. Otherwise only
    /// `{collection}/upload` is understood: it creates a resource in the
    /// collection and hands out an upload URL for it.
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let mut inner = self.lock();
        inner.calls.post += 1;
        Self::take_failure(&mut inner, FailOn::Post)?;
        if let Some(response) = inner.post_responses.get(path) {
            return Ok(response.clone());
        }

        let endpoint = path
            .strip_suffix("/upload")
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        let mut fields = body.clone();
        if let Some(object) = fields.as_object_mut() {
            object.retain(|_, v| !v.is_null());
        }
        let name = Self::collection(&mut inner, endpoint)?.name;
        let created = Self::insert(&mut inner, endpoint, fields)?;
        let upload_to = format!("memory://{}/{}", endpoint, created["id"].as_str().unwrap_or_default());

        Ok(json!({ name: created, "upload_to": upload_to }))
    }

    async fn list(&self, path: &str) -> Result<Vec<serde_json::Value>, ClientError> {
        let inner = self.lock();
        if let Some(items) = inner.lists.get(path) {
            return Ok(items.clone());
        }
        Ok(inner
            .collections
            .get(path)
            .map(|c| c.items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn raw_upload(
        &self,
        url: &str,
        mut file: tokio::fs::File,
        _len: u64,
    ) -> Result<(), ClientError> {
        {
            let mut inner = self.lock();
            inner.calls.upload += 1;
            Self::take_failure(&mut inner, FailOn::Upload)?;
        }

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        self.lock().uploads.push(Upload {
            url: url.to_string(),
            bytes,
        });
        Ok(())
    }
}
