use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Owner annotation carrying the externally reachable URL of the install.
pub const APPLICATION_URL_ANNOTATION: &str = "syndesis.io/applicationUrl";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "syndesis.io",
    version = "v1beta1",
    kind = "Syndesis",
    plural = "syndesises",
    namespaced,
    status = "SyndesisStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SyndesisSpec {
    /// Public hostname of the UI; mandatory on clusters without routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_hostname: Option<String>,
    #[serde(default)]
    pub components: ComponentsSpec,
    /// Optional features keyed by addon name (matches `addons/<name>/`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub addons: BTreeMap<String, AddonSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsSpec {
    #[serde(default)]
    pub database: DatabaseSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// When set, no database workload is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_db_url: Option<String>,
    #[serde(default)]
    pub resources: DatabaseResources,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_access_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_storage_class: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct AddonSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema,
)]
pub enum SyndesisPhase {
    #[default]
    #[serde(rename = "")]
    Missing,
    Installing,
    Starting,
    StartupFailed,
    Installed,
    NotInstalled,
    Upgrading,
    UpgradeFailureBackoff,
    UpgradeFailed,
    PostUpgradeRun,
    PostUpgradeRunSucceed,
}

impl SyndesisPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "",
            Self::Installing => "Installing",
            Self::Starting => "Starting",
            Self::StartupFailed => "StartupFailed",
            Self::Installed => "Installed",
            Self::NotInstalled => "NotInstalled",
            Self::Upgrading => "Upgrading",
            Self::UpgradeFailureBackoff => "UpgradeFailureBackoff",
            Self::UpgradeFailed => "UpgradeFailed",
            Self::PostUpgradeRun => "PostUpgradeRun",
            Self::PostUpgradeRunSucceed => "PostUpgradeRunSucceed",
        }
    }
}

impl fmt::Display for SyndesisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema,
)]
pub enum SyndesisStatusReason {
    #[default]
    #[serde(rename = "")]
    Missing,
    Duplicate,
    UpgradePodFailed,
    DeploymentNotReady,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SyndesisStatus {
    #[serde(default)]
    pub phase: SyndesisPhase,
    #[serde(default)]
    pub reason: SyndesisStatusReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Syndesis {
    pub fn phase(&self) -> SyndesisPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn application_url(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(APPLICATION_URL_ANNOTATION))
            .map(String::as_str)
    }

    /// Addon names whose `enabled` flag is set, in name order.
    pub fn enabled_addons(&self) -> Vec<&str> {
        self.spec
            .addons
            .iter()
            .filter(|(_, a)| a.enabled)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn external_db_url(&self) -> Option<&str> {
        self.spec
            .components
            .database
            .external_db_url
            .as_deref()
            .filter(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;
    use serde_json::json;

    #[test]
    fn phases_use_go_style_names_with_empty_missing() {
        assert_eq!(serde_json::to_value(SyndesisPhase::Missing).unwrap(), json!(""));
        assert_eq!(
            serde_json::to_value(SyndesisPhase::PostUpgradeRunSucceed).unwrap(),
            json!("PostUpgradeRunSucceed")
        );
        let p: SyndesisPhase = serde_json::from_value(json!("Installing")).unwrap();
        assert_eq!(p, SyndesisPhase::Installing);
        assert_eq!(p.to_string(), "Installing");
    }

    #[test]
    fn owner_parses_with_camel_case_spec() {
        let s: Syndesis = serde_json::from_value(json!({
            "apiVersion": "syndesis.io/v1beta1",
            "kind": "Syndesis",
            "metadata": { "name": "app", "namespace": "ns" },
            "spec": {
                "routeHostname": "syndesis.example.com",
                "components": { "database": { "externalDbUrl": "" } },
                "addons": { "jaeger": { "enabled": true }, "todo": { "enabled": false } }
            },
            "status": { "phase": "Installing", "reason": "" }
        }))
        .unwrap();
        assert_eq!(s.phase(), SyndesisPhase::Installing);
        assert_eq!(s.spec.route_hostname.as_deref(), Some("syndesis.example.com"));
        assert_eq!(s.enabled_addons(), vec!["jaeger"]);
        assert_eq!(s.external_db_url(), None);
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = Syndesis::crd();
        assert_eq!(crd.spec.group, "syndesis.io");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.plural, "syndesises");
        assert!(crd.spec.versions[0].subresources.as_ref().unwrap().status.is_some());
    }
}
