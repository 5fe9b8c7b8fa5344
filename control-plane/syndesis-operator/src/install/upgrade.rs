//! Post-upgrade cleanup: once the database has rolled out, drop the env var
//! that made it run its upgrade.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::core::DynamicObject;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::store::{ObjectStore, StoreError, TypeDescriptor};

pub const DB_DEPLOYMENT: &str = "syndesis-db";
pub const DB_CONTAINER: &str = "postgresql";
pub const UPGRADE_ENV: &str = "POSTGRESQL_UPGRADE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Removed,
    NothingToRemove,
    TimedOut,
    /// Reading the deployment failed.
    Aborted,
    PatchFailed,
}

fn rolled_out(dep: &Deployment) -> bool {
    let desired = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = dep
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    desired == ready
}

/// Container and env indices of the upgrade marker in `dep` as it is now.
pub fn marker_position(dep: &Deployment) -> Option<(usize, usize)> {
    let containers = &dep.spec.as_ref()?.template.spec.as_ref()?.containers;
    let ci = containers.iter().position(|c| c.name == DB_CONTAINER)?;
    let ei = containers[ci]
        .env
        .as_ref()?
        .iter()
        .position(|e| e.name == UPGRADE_ENV)?;
    Some((ci, ei))
}

/// JSON patch removing env entry `ei` of container `ci`, guarded by a test
/// that the entry is still the marker.
pub fn removal_patch(ci: usize, ei: usize) -> Result<json_patch::Patch, StoreError> {
    let path = format!("/spec/template/spec/containers/{ci}/env/{ei}");
    let ops = json!([
        { "op": "test", "path": format!("{path}/name"), "value": UPGRADE_ENV },
        { "op": "remove", "path": path },
    ]);
    Ok(serde_json::from_value(ops)?)
}

fn as_deployment(obj: DynamicObject) -> Result<Deployment, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Poll the database deployment every `interval` until it has rolled out or
/// `timeout` passes, then remove the upgrade marker.
pub async fn remove_postgres_upgrade_trigger(
    store: &dyn ObjectStore,
    clock: &dyn Clock,
    namespace: &str,
    settings: PollSettings,
) -> PollOutcome {
    let target = TypeDescriptor::new("apps/v1", "Deployment");
    let deadline = clock.now() + settings.timeout;
    loop {
        clock.sleep(settings.interval).await;

        let dep = match store.get(&target, namespace, DB_DEPLOYMENT).await {
            Ok(obj) => as_deployment(obj),
            Err(e) => Err(e),
        };
        let dep = match dep {
            Ok(dep) => dep,
            Err(e) => {
                error!(%namespace, error = %e, "getting `{DB_DEPLOYMENT}` Deployment");
                return PollOutcome::Aborted;
            }
        };

        if rolled_out(&dep) {
            let Some((ci, ei)) = marker_position(&dep) else {
                debug!(%namespace, "no upgrade marker on `{DB_DEPLOYMENT}`");
                return PollOutcome::NothingToRemove;
            };
            let patch = match removal_patch(ci, ei) {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "building upgrade marker patch");
                    return PollOutcome::PatchFailed;
                }
            };
            return match store
                .patch_json(&target, namespace, DB_DEPLOYMENT, &patch)
                .await
            {
                Ok(_) => {
                    info!(%namespace, "removed `{UPGRADE_ENV}` from `{DB_DEPLOYMENT}`");
                    PollOutcome::Removed
                }
                Err(e) => {
                    error!(%namespace, error = %e, "patching `{DB_DEPLOYMENT}` to remove `{UPGRADE_ENV}`");
                    PollOutcome::PatchFailed
                }
            };
        }

        if clock.now() >= deadline {
            warn!(%namespace, timeout = ?settings.timeout, "`{DB_DEPLOYMENT}` did not roll out in time");
            return PollOutcome::TimedOut;
        }
    }
}
