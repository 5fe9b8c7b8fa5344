use serde_json::json;
use tracing::info;

use super::ownership::OwnerInfo;
use crate::crd::{SyndesisPhase, SyndesisStatusReason};
use crate::store::{ObjectStore, StoreError, TypeDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SyndesisPhase,
    pub to: SyndesisPhase,
    /// The post-upgrade poller must run before committing.
    pub run_post_upgrade: bool,
}

/// Phase the owner moves to once an install pass has converged.
pub fn transition_for(phase: SyndesisPhase) -> Option<Transition> {
    match phase {
        SyndesisPhase::Installing => Some(Transition {
            from: phase,
            to: SyndesisPhase::Starting,
            run_post_upgrade: false,
        }),
        SyndesisPhase::PostUpgradeRun => Some(Transition {
            from: phase,
            to: SyndesisPhase::PostUpgradeRunSucceed,
            run_post_upgrade: true,
        }),
        _ => None,
    }
}

/// Write the new phase to the owner's status, clearing reason and
/// description. With a `resource_version` the write is conditional on it.
pub async fn commit(
    store: &dyn ObjectStore,
    owner: &OwnerInfo,
    resource_version: Option<&str>,
    transition: &Transition,
) -> Result<(), StoreError> {
    let target = TypeDescriptor::new(owner.api_version.clone(), owner.kind.clone());
    let mut patch = json!({
        "status": {
            "phase": transition.to,
            "reason": SyndesisStatusReason::Missing,
            "description": "",
        }
    });
    if let Some(rv) = resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    store
        .patch_status(&target, &owner.namespace, &owner.name, &patch)
        .await?;
    info!(name = %owner.name, from = %transition.from, to = %transition.to, "phase committed");
    Ok(())
}
