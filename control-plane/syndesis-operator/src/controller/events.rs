use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

use crate::crd::{Syndesis, SyndesisPhase};

pub const REASON_INSTALLED: &str = "Installed";
pub const REASON_POST_UPGRADE: &str = "PostUpgradeRunSucceeded";

/// Event reason for a committed phase, if the phase is worth announcing.
pub fn reason_for(phase: SyndesisPhase) -> Option<&'static str> {
    match phase {
        SyndesisPhase::Starting => Some(REASON_INSTALLED),
        SyndesisPhase::PostUpgradeRunSucceed => Some(REASON_POST_UPGRADE),
        _ => None,
    }
}

pub async fn emit_event(
    recorder: &Recorder,
    owner: &Syndesis,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let res = recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            &owner.object_ref(&()),
        )
        .await;
    if let Err(e) = res {
        debug!(error = %e, %reason, "event not published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_installs_are_announced() {
        assert_eq!(reason_for(SyndesisPhase::Starting), Some(REASON_INSTALLED));
        assert_eq!(
            reason_for(SyndesisPhase::PostUpgradeRunSucceed),
            Some(REASON_POST_UPGRADE)
        );
        assert_eq!(reason_for(SyndesisPhase::Installed), None);
    }
}
