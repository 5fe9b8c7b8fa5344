pub mod events;
pub mod retry;

use std::sync::Arc;

use futures_util::StreamExt;
use kube::{
    Client, Resource, ResourceExt,
    api::Api,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        watcher::Config,
    },
};
use tokio::time::Duration;
use tracing::{Span, debug, error, info, instrument};

use crate::clock::{Clock, TokioClock};
use crate::config::OperatorConfig;
use crate::credentials::KubeTokenSource;
use crate::crd::Syndesis;
use crate::install::{InstallAction, InstallError, KindWarnings, PassOutcome};
use crate::store::KubeStore;
use crate::templates::ManifestRenderer;
use events::{emit_event, reason_for};
use retry::{ErrorKind, RetryTracker, compute_backoff};

/// Re-converge installed owners this often even without changes.
const RESYNC: Duration = Duration::from_secs(300);

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    fn kind(&self) -> ErrorKind {
        match self {
            ReconcileErr::Install(e) if e.is_permanent() => ErrorKind::Permanent,
            _ => ErrorKind::Transient,
        }
    }
}

#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub cfg: OperatorConfig,
    pub warnings: Arc<KindWarnings>,
    pub clock: Arc<dyn Clock>,
    pub recorder: Recorder,
    pub retries: Arc<RetryTracker>,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: OperatorConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let reporter = Reporter {
            controller: "syndesis-operator".into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            warnings: Arc::new(KindWarnings::new(
                clock.clone(),
                cfg.kind_warning_window(),
            )),
            clock,
            retries: Arc::new(RetryTracker::new()),
            client,
            cfg,
        }
    }

    fn install_action(&self) -> InstallAction {
        InstallAction::new(
            Arc::new(KubeStore::new(
                self.client.clone(),
                self.cfg.field_manager.clone(),
            )),
            Arc::new(ManifestRenderer::new(&self.cfg.templates_dir)),
            Arc::new(KubeTokenSource::new(self.client.clone())),
            self.clock.clone(),
            self.warnings.clone(),
            self.cfg.install_settings(),
        )
    }
}

pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let api: Api<Syndesis> = match cfg.watch_namespace() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    info!(namespace = cfg.watch_namespace().unwrap_or("*"), "starting controller");
    let ctx = Arc::new(ControllerContext::new(client, cfg));

    Controller::new(api, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(name = %obj_ref.name, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip_all, fields(ns, name))]
async fn reconcile(
    obj: Arc<Syndesis>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    Span::current().record("ns", ns.as_str());
    Span::current().record("name", name.as_str());
    let uid = obj
        .meta()
        .uid
        .clone()
        .ok_or_else(|| ReconcileErr::Internal(format!("{ns}/{name} has no uid")))?;

    // children carry owner references; garbage collection removes them
    if release_if_deleted(&obj, &ctx.retries) {
        return Ok(Action::await_change());
    }
    if !InstallAction::can_execute(&obj) {
        debug!(phase = %obj.phase(), "install not applicable");
        return Ok(Action::await_change());
    }

    let outcome = ctx.install_action().execute(&obj).await?;
    ctx.retries.reset(&uid);

    match outcome {
        PassOutcome::Completed { transition, report } => {
            if let Some(reason) = transition.and_then(reason_for) {
                let note = format!(
                    "{} resources deleted during orphan sweep",
                    report.deleted.len()
                );
                emit_event(&ctx.recorder, &obj, reason, "Install", Some(note))
                    .await;
            }
            Ok(Action::requeue(RESYNC))
        }
        PassOutcome::AwaitingToken | PassOutcome::AwaitingHostname => {
            Ok(Action::requeue(ctx.cfg.requeue_after()))
        }
    }
}

/// Drops the retry state of an owner that is going away.
fn release_if_deleted(obj: &Syndesis, retries: &RetryTracker) -> bool {
    if obj.meta().deletion_timestamp.is_none() {
        return false;
    }
    if let Some(uid) = obj.meta().uid.as_deref() {
        retries.reset(uid);
    }
    true
}

fn error_policy(
    obj: Arc<Syndesis>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    let uid = obj.meta().uid.clone().unwrap_or_default();
    let attempt = ctx.retries.increment(&uid);
    error!(name = %obj.name_any(), attempt, error = %err, "install pass failed");
    compute_backoff(attempt, err.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use serde_json::json;

    fn owner(deleting: bool) -> Syndesis {
        let mut meta = json!({ "name": "app", "namespace": "ns", "uid": "u1" });
        if deleting {
            meta["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        }
        serde_json::from_value(json!({
            "apiVersion": "syndesis.io/v1beta1", "kind": "Syndesis",
            "metadata": meta,
            "spec": {},
            "status": { "phase": "Installing" }
        }))
        .unwrap()
    }

    #[test]
    fn deleted_owners_release_their_retry_state() {
        let retries = RetryTracker::new();
        retries.increment("u1");
        retries.increment("u1");

        assert!(!release_if_deleted(&owner(false), &retries));
        assert_eq!(retries.get("u1"), 2);

        assert!(release_if_deleted(&owner(true), &retries));
        assert_eq!(retries.get("u1"), 0);
    }

    #[test]
    fn error_kinds_follow_install_permanence() {
        let permanent = ReconcileErr::Install(InstallError::Config("x".into()));
        assert_eq!(permanent.kind(), ErrorKind::Permanent);
        let transient =
            ReconcileErr::Install(InstallError::Store(StoreError::not_found("x")));
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert_eq!(ReconcileErr::Internal("x".into()).kind(), ErrorKind::Transient);
    }
}
