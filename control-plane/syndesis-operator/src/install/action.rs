use std::sync::Arc;

use kube::ResourceExt;
use kube::core::DynamicObject;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument};

use super::discovery::{discover_namespaced_types, serves_routes};
use super::ownership::{OwnerInfo, stamp};
use super::phase::{commit, transition_for};
use super::route::install_route;
use super::scanner::DEFAULT_PAGE_SIZE;
use super::sweep::{KindWarnings, sweep_orphans};
use super::upgrade::{PollSettings, remove_postgres_upgrade_trigger};
use super::upsert::{OperationResult, create_or_update};
use super::{InstallError, PassOutcome, ShouldExist};
use crate::clock::Clock;
use crate::credentials::TokenSource;
use crate::crd::{APPLICATION_URL_ANNOTATION, Syndesis, SyndesisPhase};
use crate::store::{ObjectStore, StoreError, TypeDescriptor};
use crate::templates::{RenderConfig, Renderer};

pub const OAUTH_SERVICE_ACCOUNT: &str = "syndesis-oauth-client";
pub const PULL_SECRET: &str = "syndesis-pull-secret";
pub const BUILDER_SERVICE_ACCOUNT: &str = "builder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallSettings {
    pub page_size: u32,
    pub poll: PollSettings,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll: PollSettings::default(),
        }
    }
}

/// Installs (or re-converges) everything one `Syndesis` owner needs.
pub struct InstallAction {
    store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn Renderer>,
    tokens: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    warnings: Arc<KindWarnings>,
    settings: InstallSettings,
}

fn oauth_service_account(
    pull_secret: Option<&str>,
) -> Result<DynamicObject, StoreError> {
    let reference = json!({
        "kind": "OAuthRedirectReference",
        "apiVersion": "v1",
        "reference": { "kind": "Route", "name": "syndesis" }
    });
    let mut sa = json!({
        "apiVersion": "v1",
        "kind": "ServiceAccount",
        "metadata": {
            "name": OAUTH_SERVICE_ACCOUNT,
            "labels": { "app": "syndesis" },
            "annotations": {
                "serviceaccounts.openshift.io/oauth-redirecturi.local": "https://localhost:4200",
                "serviceaccounts.openshift.io/oauth-redirecturi.route": "https://",
                "serviceaccounts.openshift.io/oauth-redirectreference.route": reference.to_string(),
            }
        }
    });
    if let Some(secret) = pull_secret {
        sa["imagePullSecrets"] = json!([{ "name": secret }]);
    }
    Ok(serde_json::from_value(sa)?)
}

/// Append `entry` to the array at `field` unless an entry with the same
/// name is already there.
fn link_named(data: &mut JsonValue, field: &str, entry: JsonValue) -> bool {
    if !data.is_object() {
        *data = json!({});
    }
    let list = &mut data[field];
    if !list.is_array() {
        *list = json!([]);
    }
    let Some(items) = list.as_array_mut() else {
        return false;
    };
    if items.iter().any(|i| i["name"] == entry["name"]) {
        return false;
    }
    items.push(entry);
    true
}

impl InstallAction {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn Renderer>,
        tokens: Arc<dyn TokenSource>,
        clock: Arc<dyn Clock>,
        warnings: Arc<KindWarnings>,
        settings: InstallSettings,
    ) -> Self {
        Self {
            store,
            renderer,
            tokens,
            clock,
            warnings,
            settings,
        }
    }

    /// Phases in which an install pass runs at all.
    pub fn can_execute(owner: &Syndesis) -> bool {
        matches!(
            owner.phase(),
            SyndesisPhase::Installing
                | SyndesisPhase::Installed
                | SyndesisPhase::PostUpgradeRun
                | SyndesisPhase::Starting
                | SyndesisPhase::StartupFailed
        )
    }

    fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    async fn find_pull_secret(
        &self,
        namespace: &str,
    ) -> Result<Option<String>, StoreError> {
        let target = TypeDescriptor::new("v1", "Secret");
        match self.store().get(&target, namespace, PULL_SECRET).await {
            Ok(_) => Ok(Some(PULL_SECRET.to_string())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn link_pull_secret_to_builder(
        &self,
        namespace: &str,
        secret: &str,
    ) -> Result<(), StoreError> {
        let target = TypeDescriptor::new("v1", "ServiceAccount");
        let mut builder = match self
            .store()
            .get(&target, namespace, BUILDER_SERVICE_ACCOUNT)
            .await
        {
            Ok(sa) => sa,
            Err(e) if e.is_not_found() => {
                debug!(%namespace, "no `{BUILDER_SERVICE_ACCOUNT}` service account to link");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let pulled =
            link_named(&mut builder.data, "imagePullSecrets", json!({ "name": secret }));
        let mounted = link_named(
            &mut builder.data,
            "secrets",
            json!({ "namespace": namespace, "name": secret }),
        );
        if pulled || mounted {
            self.store().update(&builder).await?;
            info!(%namespace, %secret, "linked pull secret to `{BUILDER_SERVICE_ACCOUNT}`");
        }
        Ok(())
    }

    fn render_resources(
        &self,
        owner: &Syndesis,
        cfg: &RenderConfig,
    ) -> Result<Vec<DynamicObject>, InstallError> {
        let mut all = self.renderer.render("infrastructure", cfg)?;

        if owner.external_db_url().is_none() {
            let db = self.renderer.render("database", cfg)?;
            if owner.phase() == SyndesisPhase::Installing {
                info!(
                    volume_access_mode = cfg.volume_access_mode(),
                    volume_name = cfg.volume_name.as_deref().unwrap_or_default(),
                    storage_class = cfg.volume_storage_class.as_deref().unwrap_or_default(),
                    "will bind syndesis-db to persistent volume with criteria"
                );
            }
            all.extend(db);
        }

        for addon in &cfg.addons {
            let dir = format!("addons/{addon}");
            if !self.renderer.has_dir(&dir) {
                info!(%addon, "unsupported addon configured");
                continue;
            }
            all.extend(self.renderer.render(&dir, cfg)?);
        }
        Ok(all)
    }

    /// Upsert every rendered resource in order, recording what now exists.
    async fn apply_all(
        &self,
        owner: &OwnerInfo,
        resources: Vec<DynamicObject>,
        should_exist: &mut ShouldExist,
    ) -> Result<(), InstallError> {
        for mut res in resources {
            stamp(&mut res, owner);
            let target = TypeDescriptor::of(&res)?;
            let name = res.name_any();
            match create_or_update(self.store(), &res).await {
                Ok((live, op)) => {
                    should_exist.insert(&live)?;
                    if op != OperationResult::Unchanged {
                        info!(kind = %target.kind, %name, namespace = %owner.namespace, "resource {op}");
                    }
                }
                Err(e) if e.is_no_kind_match() => {
                    if self.warnings.should_report(&target) {
                        info!(
                            group = target.group(),
                            version = target.version(),
                            kind = %target.kind,
                            "optional custom resource definition is not installed"
                        );
                    }
                }
                Err(e) => {
                    info!(kind = %target.kind, %name, namespace = %owner.namespace, "failed to create or replace resource");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Returns the owner's resource version after the write, if any.
    async fn record_application_url(
        &self,
        owner: &Syndesis,
        info: &OwnerInfo,
        url: &str,
    ) -> Result<Option<String>, StoreError> {
        if owner.application_url() == Some(url) {
            return Ok(owner.resource_version());
        }
        let target = TypeDescriptor::new(info.api_version.clone(), info.kind.clone());
        let patch = json!({
            "metadata": { "annotations": { APPLICATION_URL_ANNOTATION: url } }
        });
        let patched = self
            .store()
            .patch_merge(&target, &info.namespace, &info.name, &patch)
            .await?;
        debug!(%url, "application url recorded");
        Ok(patched.metadata.resource_version)
    }

    /// One install pass. Safe to re-run from the start after any failure.
    #[instrument(skip_all, fields(name = %owner.name_any(), phase = %owner.phase()))]
    pub async fn execute(
        &self,
        owner: &Syndesis,
    ) -> Result<PassOutcome, InstallError> {
        match owner.phase() {
            SyndesisPhase::Installing => info!("installing Syndesis resource"),
            SyndesisPhase::PostUpgradeRun => {
                info!("installing Syndesis resource for the first time after upgrading")
            }
            _ => {}
        }

        let info = OwnerInfo::of(owner)?;
        let namespace = info.namespace.clone();
        let mut should_exist = ShouldExist::new();

        // route support decides the hostname requirement, so it is known
        // before anything is written
        let types = discover_namespaced_types(self.store()).await?;
        let mut cfg = RenderConfig::from_owner(owner, serves_routes(&types));
        if cfg.missing_route_hostname() {
            return Err(InstallError::Config(
                "spec.routeHostname is required on clusters without routes".into(),
            ));
        }

        let pull_secret = self.find_pull_secret(&namespace).await?;
        if let Some(secret) = &pull_secret {
            cfg.image_pull_secrets.push(secret.clone());
        }

        let mut sa = oauth_service_account(pull_secret.as_deref())?;
        stamp(&mut sa, &info);
        let (sa, _) = create_or_update(self.store(), &sa).await?;
        should_exist.insert(&sa)?;

        match self
            .tokens
            .service_account_token(OAUTH_SERVICE_ACCOUNT, &namespace)
            .await
        {
            Ok(token) => cfg.oauth_client_secret = Some(token),
            Err(e) => {
                info!(error = %e, "unable to get service account token");
                return Ok(PassOutcome::AwaitingToken);
            }
        }

        let routes = self.renderer.render("route", &cfg)?;
        let conduit = match install_route(self.store(), &info, &routes).await {
            Ok(c) => c,
            Err(e @ InstallError::HostnameUnavailable { .. }) => {
                info!(error = %e, "unable to set route syndesis");
                return Ok(PassOutcome::AwaitingHostname);
            }
            Err(e) => return Err(e),
        };
        cfg.set_route(conduit.host());
        should_exist.insert(conduit.object())?;

        let resources = self.render_resources(owner, &cfg)?;

        if let Some(secret) = &pull_secret {
            self.link_pull_secret_to_builder(&namespace, secret).await?;
        }

        self.apply_all(&info, resources, &mut should_exist).await?;

        // discovered again: kinds may have come or gone during the upserts
        let report = sweep_orphans(
            self.store(),
            &namespace,
            &info.uid,
            &should_exist,
            self.settings.page_size,
            &self.warnings,
        )
        .await?;
        debug!(
            kinds = report.kinds,
            scanned = report.scanned,
            deleted = report.deleted.len(),
            "orphan sweep finished"
        );

        let rv = self
            .record_application_url(owner, &info, &conduit.application_url())
            .await?;

        let Some(transition) = transition_for(owner.phase()) else {
            return Ok(PassOutcome::Completed {
                transition: None,
                report,
            });
        };
        if transition.run_post_upgrade {
            let outcome = remove_postgres_upgrade_trigger(
                self.store(),
                self.clock.as_ref(),
                &namespace,
                self.settings.poll,
            )
            .await;
            debug!(?outcome, "post-upgrade cleanup finished");
        }
        commit(self.store(), &info, rv.as_deref(), &transition).await?;
        info!(to = %transition.to, "Syndesis resource installed");
        Ok(PassOutcome::Completed {
            transition: Some(transition.to),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner(phase: &str) -> Syndesis {
        serde_json::from_value(json!({
            "apiVersion": "syndesis.io/v1beta1", "kind": "Syndesis",
            "metadata": { "name": "app", "namespace": "ns", "uid": "o1" },
            "spec": {},
            "status": { "phase": phase }
        }))
        .unwrap()
    }

    #[test]
    fn runs_only_for_allowed_phases() {
        for p in ["Installing", "Installed", "PostUpgradeRun", "Starting", "StartupFailed"] {
            assert!(InstallAction::can_execute(&owner(p)), "{p}");
        }
        for p in ["", "NotInstalled", "Upgrading", "UpgradeFailed", "PostUpgradeRunSucceed"] {
            assert!(!InstallAction::can_execute(&owner(p)), "{p}");
        }
    }

    #[test]
    fn oauth_account_carries_redirects_and_pull_secret() {
        let sa = oauth_service_account(Some(PULL_SECRET)).unwrap();
        let ann = sa.metadata.annotations.unwrap();
        assert_eq!(
            ann["serviceaccounts.openshift.io/oauth-redirecturi.local"],
            "https://localhost:4200"
        );
        let reference: JsonValue = serde_json::from_str(
            &ann["serviceaccounts.openshift.io/oauth-redirectreference.route"],
        )
        .unwrap();
        assert_eq!(reference["reference"]["name"], "syndesis");
        assert_eq!(sa.data["imagePullSecrets"][0]["name"], PULL_SECRET);

        let bare = oauth_service_account(None).unwrap();
        assert!(bare.data.get("imagePullSecrets").is_none());
    }

    #[test]
    fn linking_is_idempotent() {
        let mut data = json!({ "secrets": [{ "name": "builder-token" }] });
        assert!(link_named(&mut data, "secrets", json!({ "name": PULL_SECRET })));
        assert!(!link_named(&mut data, "secrets", json!({ "name": PULL_SECRET })));
        assert!(link_named(&mut data, "imagePullSecrets", json!({ "name": PULL_SECRET })));
        assert_eq!(data["secrets"].as_array().unwrap().len(), 2);
    }
}
