//! In-place updates of mutable attributes.

use std::collections::BTreeSet;

use tracing::info;

use crate::clients::ResourceClient;
use crate::error::ReconcileError;
use crate::kind::ResourceKind;
use crate::state::{ActionLog, Attributes, RemoteResource};

/// Fields of `desired` that are mutable and differ from `current`.
///
/// Fields outside `mutable` are creation-time only and never staged.
pub fn diff(current: &Attributes, desired: &Attributes, mutable: &BTreeSet<String>) -> Attributes {
    desired
        .iter()
        .filter(|(key, _)| mutable.contains(*key))
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Push all staged changes to the API in one call.
///
/// Registers a single action naming the changed fields (never their values)
/// once the update succeeded. Nothing is called or registered when there is
/// nothing to change.
pub async fn apply_updates(
    client: &dyn ResourceClient,
    kind: &ResourceKind,
    resource: &mut RemoteResource,
    identity: &str,
    desired: &Attributes,
    mutable: &BTreeSet<String>,
    log: &mut ActionLog,
) -> Result<bool, ReconcileError> {
    let changes = diff(&resource.attributes, desired, mutable);
    if changes.is_empty() {
        return Ok(false);
    }

    let fields: Vec<&str> = changes.keys().map(String::as_str).collect();
    info!("Updating {} {} fields: {}", kind.name, identity, fields.join(", "));

    client
        .update(kind, &resource.id, &changes)
        .await
        .map_err(|source| ReconcileError::Update {
            kind: kind.name,
            identity: identity.to_string(),
            source,
        })?;

    resource.apply(&changes);
    log.register(format!(
        "Updated {} {}: {}",
        kind.name,
        identity,
        fields.join(", ")
    ));
    Ok(true)
}
