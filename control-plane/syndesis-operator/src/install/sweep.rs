use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use kube::core::DynamicObject;
use tracing::{info, instrument, warn};

use super::ShouldExist;
use super::discovery::discover_namespaced_types;
use super::ownership::owner_label_selector;
use super::scanner::{PageHandler, ScanOutcome, list_in_chunks};
use crate::clock::Clock;
use crate::store::{ObjectStore, StoreError, TypeDescriptor};

pub const DEFAULT_WARNING_WINDOW: Duration = Duration::from_secs(3600);

/// Remembers which unsupported kinds were already reported, so each one is
/// logged at most once per window.
pub struct KindWarnings {
    clock: Arc<dyn Clock>,
    window: Duration,
    reported: Mutex<HashMap<(String, String), Instant>>,
}

impl KindWarnings {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            clock,
            window,
            reported: Mutex::new(HashMap::new()),
        }
    }

    /// True the first time `target` is seen, and again once the window has
    /// passed since it was last reported.
    pub fn should_report(&self, target: &TypeDescriptor) -> bool {
        let now = self.clock.now();
        let mut reported =
            self.reported.lock().unwrap_or_else(|p| p.into_inner());
        match reported.get(&target.key()) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                reported.insert(target.key(), now);
                true
            }
        }
    }
}

/// A live object is an orphan of `owner_uid` when this pass did not confirm
/// it and the owner is its first owner reference.
pub fn is_orphan(
    obj: &DynamicObject,
    owner_uid: &str,
    should_exist: &ShouldExist,
) -> bool {
    if obj
        .metadata
        .uid
        .as_deref()
        .is_some_and(|uid| should_exist.contains(uid))
    {
        return false;
    }
    obj.metadata
        .owner_references
        .as_deref()
        .and_then(|refs| refs.first())
        .is_some_and(|r| r.uid == owner_uid)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub kinds: usize,
    pub skipped: usize,
    pub pages: usize,
    pub scanned: usize,
    /// `kind/name` of every deleted orphan.
    pub deleted: Vec<String>,
    pub failed: usize,
}

struct SweepPage<'a> {
    store: &'a dyn ObjectStore,
    owner_uid: &'a str,
    should_exist: &'a ShouldExist,
    report: &'a mut SweepReport,
}

#[async_trait]
impl PageHandler for SweepPage<'_> {
    async fn handle(
        &mut self,
        page: Vec<DynamicObject>,
    ) -> Result<(), StoreError> {
        for obj in page {
            if !is_orphan(&obj, self.owner_uid, self.should_exist) {
                continue;
            }
            let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
            let name = obj.metadata.name.clone().unwrap_or_default();
            let namespace = obj.metadata.namespace.clone().unwrap_or_default();
            match self.store.delete(&obj).await {
                Ok(()) => {
                    info!(%kind, %name, %namespace, "resource deleted");
                    self.report.deleted.push(format!("{kind}/{name}"));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(%kind, %name, %namespace, error = %e, "could not delete resource");
                    self.report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

/// Delete every object of `types` in `namespace` labelled for the owner that
/// is not in `should_exist`. Skipped kinds are reported through `warnings`.
pub async fn sweep_types(
    store: &dyn ObjectStore,
    types: &[TypeDescriptor],
    namespace: &str,
    owner_uid: &str,
    should_exist: &ShouldExist,
    page_size: u32,
    warnings: &KindWarnings,
) -> Result<SweepReport, StoreError> {
    let selector = owner_label_selector(owner_uid);
    let mut report = SweepReport::default();
    for target in types {
        report.kinds += 1;
        if !target.listable {
            report.skipped += 1;
            continue;
        }
        let mut handler = SweepPage {
            store,
            owner_uid,
            should_exist,
            report: &mut report,
        };
        let outcome = list_in_chunks(
            store,
            target,
            namespace,
            &selector,
            page_size,
            &mut handler,
        )
        .await?;
        match outcome {
            ScanOutcome::Completed { pages, objects } => {
                report.pages += pages;
                report.scanned += objects;
            }
            ScanOutcome::Skipped(reason) => {
                report.skipped += 1;
                if warnings.should_report(target) {
                    info!(kind = %target, ?reason, "kind skipped by orphan sweep");
                }
            }
        }
    }
    Ok(report)
}

/// Discover the current kinds, then sweep them.
#[instrument(skip_all, fields(ns = %namespace, owner = %owner_uid))]
pub async fn sweep_orphans(
    store: &dyn ObjectStore,
    namespace: &str,
    owner_uid: &str,
    should_exist: &ShouldExist,
    page_size: u32,
    warnings: &KindWarnings,
) -> Result<SweepReport, StoreError> {
    let types = discover_namespaced_types(store).await?;
    sweep_types(
        store,
        &types,
        namespace,
        owner_uid,
        should_exist,
        page_size,
        warnings,
    )
    .await
}
