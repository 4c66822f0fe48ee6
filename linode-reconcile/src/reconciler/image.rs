//! Image reconciliation - images are cloned from a disk or uploaded from a file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{CreationStrategy, ResourceDefinition};
use crate::clients::ResourceClient;
use crate::error::{ClientError, ReconcileError};
use crate::kind::{ResourceKind, IMAGE};
use crate::state::{ActionLog, Attributes, DesiredState, RemoteResource, Value, WaitPolicy};

pub const DEFAULT_REGION: &str = "us-east";
pub const AVAILABLE: &str = "available";
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

pub fn definition() -> ResourceDefinition {
    ResourceDefinition {
        kind: IMAGE,
        strategies: vec![Box::new(FromDisk), Box::new(FromFile)],
    }
}

/// Wait until the image is `available`.
pub fn wait_policy(timeout: Duration) -> WaitPolicy {
    WaitPolicy::new([AVAILABLE], POLL_INTERVAL, timeout)
}

fn optional_string(desired: &DesiredState, key: &str) -> serde_json::Value {
    desired
        .get(key)
        .map(Value::to_json)
        .unwrap_or(serde_json::Value::Null)
}

/// Clone an image from an existing disk.
pub struct FromDisk;

#[async_trait]
impl CreationStrategy for FromDisk {
    fn source_field(&self) -> &'static str {
        "disk_id"
    }

    async fn create(
        &self,
        client: &dyn ResourceClient,
        kind: &ResourceKind,
        desired: &DesiredState,
        _actions: &mut ActionLog,
    ) -> Result<RemoteResource, ReconcileError> {
        let identity = desired.identity();
        let mut body = Attributes::new();
        for key in ["disk_id", "label", "description"] {
            if let Some(value) = desired.get(key) {
                body.insert(key.to_string(), value.clone());
            }
        }

        info!("Creating {} {} from disk", kind.name, identity);
        client
            .create(kind, &body)
            .await
            .map_err(|e| ReconcileError::remote("create", kind.name, identity, e))
    }
}

/// Upload an image from a local file.
///
/// The upload is registered first, which returns the new image and a
/// pre-signed URL; the file is then streamed to that URL. If streaming fails
/// the registered image is left behind in `pending_upload` and recorded as
/// an action.
pub struct FromFile;

#[async_trait]
impl CreationStrategy for FromFile {
    fn source_field(&self) -> &'static str {
        "source_file"
    }

    async fn create(
        &self,
        client: &dyn ResourceClient,
        kind: &ResourceKind,
        desired: &DesiredState,
        actions: &mut ActionLog,
    ) -> Result<RemoteResource, ReconcileError> {
        let identity = desired.identity();
        let path = match desired.get("source_file") {
            Some(Value::String(path)) => PathBuf::from(path),
            _ => {
                return Err(ReconcileError::configuration(
                    kind.name,
                    identity,
                    "source_file must be a path",
                ))
            }
        };

        // Checked before any remote call.
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                return Err(ReconcileError::FileNotFound {
                    kind: kind.name,
                    identity,
                    path,
                })
            }
        };

        let region = desired
            .get("region")
            .map(Value::to_json)
            .unwrap_or_else(|| json!(DEFAULT_REGION));
        let request = json!({
            "label": optional_string(desired, "label"),
            "description": optional_string(desired, "description"),
            "region": region,
        });

        let upload_path = format!("{}/upload", kind.endpoint);
        let result = client
            .post(&upload_path, &request)
            .await
            .map_err(|e| ReconcileError::remote("create upload for", kind.name, identity.as_str(), e))?;

        let (upload_to, image) = parse_upload_response(kind, result)
            .map_err(|e| ReconcileError::remote("create upload for", kind.name, identity.as_str(), e))?;

        info!(
            "Uploading {} ({} bytes) to {} {}",
            path.display(),
            metadata.len(),
            kind.name,
            identity
        );
        let uploaded = match tokio::fs::File::open(&path).await {
            Ok(file) => client
                .raw_upload(&upload_to, file, metadata.len())
                .await
                .map_err(|e| ReconcileError::remote("upload", kind.name, identity.as_str(), e)),
            Err(_) => Err(ReconcileError::FileNotFound {
                kind: kind.name,
                identity: identity.clone(),
                path: path.clone(),
            }),
        };

        if let Err(e) = uploaded {
            actions.register(format!("Registered upload of {} {}", kind.name, identity));
            return Err(e);
        }
        Ok(image)
    }
}

/// Split an upload registration response into the upload URL and the image.
fn parse_upload_response(
    kind: &ResourceKind,
    mut response: serde_json::Value,
) -> Result<(String, RemoteResource), ClientError> {
    let upload_to = response
        .get("upload_to")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ClientError::Decode("upload response has no upload_to URL".to_string()))?
        .to_string();
    let image = response
        .get_mut(kind.name)
        .map(serde_json::Value::take)
        .ok_or_else(|| ClientError::Decode(format!("upload response has no {}", kind.name)))?;

    Ok((upload_to, RemoteResource::from_json(kind.name, image)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Existence;
    use crate::test_util::{FailOn, MemoryClient};

    #[tokio::test]
    async fn test_from_disk_sends_creation_fields_only() {
        let client = MemoryClient::new();
        let desired = DesiredState::new(&IMAGE, Existence::Present)
            .attr("label", "base")
            .attr("disk_id", 42i64)
            .attr("region", "eu-west");

        let created = FromDisk
            .create(&client, &IMAGE, &desired, &mut ActionLog::new())
            .await
            .unwrap();
        let stored = client.stored(&IMAGE, &created.id).unwrap();

        assert_eq!(stored["disk_id"], 42);
        assert_eq!(stored["label"], "base");
        assert!(stored.get("region").is_none());
    }

    #[tokio::test]
    async fn test_from_file_missing_path_makes_no_call() {
        let client = MemoryClient::new();
        let desired = DesiredState::new(&IMAGE, Existence::Present)
            .attr("label", "base")
            .attr("source_file", "/nonexistent/image.img.gz");

        let err = FromFile
            .create(&client, &IMAGE, &desired, &mut ActionLog::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::FileNotFound { .. }));
        assert_eq!(client.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_from_file_uploads_contents() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"image-bytes").unwrap();

        let client = MemoryClient::new();
        let desired = DesiredState::new(&IMAGE, Existence::Present)
            .attr("label", "uploaded")
            .attr("source_file", file.path().to_string_lossy().into_owned());

        let image = FromFile
            .create(&client, &IMAGE, &desired, &mut ActionLog::new())
            .await
            .unwrap();

        let stored = client.stored(&IMAGE, &image.id).unwrap();
        assert_eq!(stored["region"], DEFAULT_REGION);
        assert_eq!(stored["label"], "uploaded");

        let uploads = client.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].bytes, b"image-bytes");
        assert_eq!(uploads[0].url, format!("memory://images/{}", image.id));
    }

    #[tokio::test]
    async fn test_upload_response_without_url_is_remote_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"image-bytes").unwrap();

        let client = MemoryClient::new();
        client.set_post_response(
            "images/upload",
            serde_json::json!({"image": {"id": "private/3", "label": "uploaded"}}),
        );
        let desired = DesiredState::new(&IMAGE, Existence::Present)
            .attr("label", "uploaded")
            .attr("source_file", file.path().to_string_lossy().into_owned());

        let err = FromFile
            .create(&client, &IMAGE, &desired, &mut ActionLog::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Remote {
                source: ClientError::Decode(_),
                ..
            }
        ));
        assert_eq!(client.calls().upload, 0);
    }

    #[tokio::test]
    async fn test_failed_upload_records_registration() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"image-bytes").unwrap();

        let client = MemoryClient::new();
        client.fail_next(
            FailOn::Upload,
            ClientError::Transport("connection reset".to_string()),
        );
        let desired = DesiredState::new(&IMAGE, Existence::Present)
            .attr("label", "uploaded")
            .attr("source_file", file.path().to_string_lossy().into_owned());
        let mut actions = ActionLog::new();

        let err = FromFile
            .create(&client, &IMAGE, &desired, &mut actions)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Remote { .. }));
        assert_eq!(actions.actions(), ["Registered upload of image uploaded"]);
        assert_eq!(client.count(&IMAGE), 1);
    }
}
