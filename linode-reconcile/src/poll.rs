//! Waiting for a resource to reach a status.

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::clients::ResourceClient;
use crate::error::ReconcileError;
use crate::kind::ResourceKind;
use crate::state::{RemoteResource, WaitPolicy};

/// Refresh `resource` until its status is one of the policy's targets.
///
/// The first refresh happens immediately. After that the resource is
/// refreshed every `interval`; the deadline is checked after every refresh,
/// before its status is looked at, and the last sleep is shortened so that no
/// refresh starts after the deadline. Refresh failures are returned as-is,
/// without retry.
pub async fn wait_for_status(
    client: &dyn ResourceClient,
    kind: &ResourceKind,
    resource: &RemoteResource,
    identity: &str,
    policy: &WaitPolicy,
) -> Result<RemoteResource, ReconcileError> {
    let start = Instant::now();
    let deadline = start + policy.timeout;

    let refresh = move || async move {
        client
            .get(kind, &resource.id)
            .await
            .map_err(|source| ReconcileError::Poll {
                kind: kind.name,
                identity: identity.to_string(),
                source,
            })
    };
    let reached = |r: &RemoteResource| {
        r.status()
            .is_some_and(|s| policy.target_statuses.contains(s))
    };

    let timed_out = |elapsed| ReconcileError::Timeout {
        kind: kind.name,
        identity: identity.to_string(),
        targets: policy.target_statuses.clone(),
        elapsed,
    };

    let mut current = refresh().await?;
    let mut waiting = false;

    loop {
        // A target status observed past the deadline still counts as a timeout.
        let now = Instant::now();
        if now > deadline {
            return Err(timed_out(now - start));
        }

        if reached(&current) {
            if waiting {
                info!(
                    "{} {} reached status {} after {:?}",
                    kind.name,
                    identity,
                    current.status().unwrap_or_default(),
                    now - start
                );
            }
            return Ok(current);
        }

        if now >= deadline {
            return Err(timed_out(now - start));
        }

        if !waiting {
            info!(
                "Waiting for {} {} to reach status {:?} (timeout {:?})",
                kind.name, identity, policy.target_statuses, policy.timeout
            );
            waiting = true;
        }

        sleep(policy.interval.min(deadline - now)).await;
        current = refresh().await?;
        debug!(
            "{} {} status: {}",
            kind.name,
            identity,
            current.status().unwrap_or("<none>")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::kind::IMAGE;
    use crate::test_util::{FailOn, MemoryClient};
    use serde_json::json;
    use std::time::Duration;

    fn policy(interval: u64, timeout: u64) -> WaitPolicy {
        WaitPolicy::new(
            ["available"],
            Duration::from_secs(interval),
            Duration::from_secs(timeout),
        )
    }

    async fn seeded(client: &MemoryClient, status: &str) -> RemoteResource {
        let id = client.seed(&IMAGE, json!({"label": "base", "status": status}));
        client.get(&IMAGE, &id).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_target_does_not_sleep() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "available").await;
        let gets_before = client.calls().get;

        let start = Instant::now();
        let result = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 30))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(result.status(), Some("available"));
        assert_eq!(client.calls().get - gets_before, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_target_after_some_ticks() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "creating").await;
        client.script_status(&resource.id, ["pending_upload", "creating", "available"]);

        let start = Instant::now();
        let result = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 600))
            .await
            .unwrap();

        assert_eq!(result.status(), Some("available"));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_refreshes_and_elapsed() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "creating").await;
        let gets_before = client.calls().get;

        let start = Instant::now();
        let err = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 30))
            .await
            .unwrap_err();

        let refreshes = client.calls().get - gets_before;
        assert!(refreshes <= 4, "refreshed {} times", refreshes);
        match err {
            ReconcileError::Timeout {
                elapsed, targets, ..
            } => {
                assert!(elapsed >= Duration::from_secs(30));
                assert!(elapsed < Duration::from_secs(40));
                assert!(targets.contains("available"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_timeout_shortens_last_sleep() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "creating").await;

        let start = Instant::now();
        let err = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 25))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refresh_past_deadline_times_out() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "creating").await;
        client.script_status(&resource.id, ["creating", "available"]);
        client.delay_get(Duration::from_secs(25));

        let err = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 30))
            .await
            .unwrap_err();

        // Refreshes finish at 25s and 55s; the second one reports the target too late.
        match err {
            ReconcileError::Timeout { elapsed, .. } => {
                assert_eq!(elapsed, Duration::from_secs(55))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_past_deadline_times_out() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "available").await;
        client.delay_get(Duration::from_secs(40));

        let err = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 30))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_is_not_retried() {
        let client = MemoryClient::new();
        let resource = seeded(&client, "creating").await;
        client.fail_next(FailOn::Get, ClientError::Transport("connection reset".to_string()));
        let gets_before = client.calls().get;

        let err = wait_for_status(&client, &IMAGE, &resource, "base", &policy(10, 30))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Poll {
                source: ClientError::Transport(_),
                ..
            }
        ));
        assert_eq!(client.calls().get - gets_before, 1);
    }
}
