//! The externally reachable endpoint of the install and its hostname.

use kube::core::DynamicObject;
use tracing::{debug, info};

use super::InstallError;
use super::ownership::{OwnerInfo, stamp};
use super::upsert::create_or_update;
use crate::store::{ObjectStore, TypeDescriptor, object_namespace};

pub const SYNDESIS_ROUTE_NAME: &str = "syndesis";

/// An OpenShift route or a Kubernetes ingress exposing the UI.
#[derive(Debug, Clone)]
pub enum Conduit {
    Route(DynamicObject),
    Ingress(DynamicObject),
}

impl Conduit {
    pub fn from_object(obj: DynamicObject) -> Option<Self> {
        let td = TypeDescriptor::of(&obj).ok()?;
        match (td.group(), td.kind.as_str()) {
            ("route.openshift.io", "Route") => Some(Conduit::Route(obj)),
            ("networking.k8s.io", "Ingress") => Some(Conduit::Ingress(obj)),
            _ => None,
        }
    }

    /// The endpoint called `name` among rendered manifests.
    pub fn find(objects: &[DynamicObject], name: &str) -> Result<Self, InstallError> {
        objects
            .iter()
            .filter(|o| o.metadata.name.as_deref() == Some(name))
            .find_map(|o| Conduit::from_object(o.clone()))
            .ok_or_else(|| InstallError::EndpointNotFound(name.to_string()))
    }

    pub fn object(&self) -> &DynamicObject {
        match self {
            Conduit::Route(o) | Conduit::Ingress(o) => o,
        }
    }

    fn with_object(&self, obj: DynamicObject) -> Self {
        match self {
            Conduit::Route(_) => Conduit::Route(obj),
            Conduit::Ingress(_) => Conduit::Ingress(obj),
        }
    }

    pub fn host(&self) -> &str {
        let spec = &self.object().data["spec"];
        let host = match self {
            Conduit::Route(_) => spec["host"].as_str(),
            Conduit::Ingress(_) => spec["rules"][0]["host"].as_str(),
        };
        host.unwrap_or_default()
    }

    fn has_tls(&self) -> bool {
        let tls = &self.object().data["spec"]["tls"];
        match self {
            Conduit::Route(_) => tls.is_object(),
            Conduit::Ingress(_) => tls.as_array().is_some_and(|t| !t.is_empty()),
        }
    }

    pub fn application_url(&self) -> String {
        let scheme = if self.has_tls() { "https" } else { "http" };
        format!("{scheme}://{}", self.host())
    }
}

/// Upsert the endpoint and wait for its hostname with exactly one re-read.
pub async fn install_route(
    store: &dyn ObjectStore,
    owner: &OwnerInfo,
    rendered: &[DynamicObject],
) -> Result<Conduit, InstallError> {
    let found = Conduit::find(rendered, SYNDESIS_ROUTE_NAME)?;
    let mut desired = found.object().clone();
    stamp(&mut desired, owner);

    let (live, op) = create_or_update(store, &desired).await?;
    debug!(name = SYNDESIS_ROUTE_NAME, %op, "endpoint upserted");
    let conduit = found.with_object(live);
    if !conduit.host().is_empty() {
        return Ok(conduit);
    }

    let target = TypeDescriptor::of(conduit.object())?;
    let refreshed = store
        .get(&target, object_namespace(conduit.object()), SYNDESIS_ROUTE_NAME)
        .await?;
    let conduit = conduit.with_object(refreshed);
    if conduit.host().is_empty() {
        info!(name = SYNDESIS_ROUTE_NAME, "hostname not assigned yet");
        return Err(InstallError::HostnameUnavailable {
            name: SYNDESIS_ROUTE_NAME.to_string(),
        });
    }
    Ok(conduit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{RouteAdmission, Verb};
    use crate::store::MemoryStore;
    use serde_json::{Value as JsonValue, json};

    fn owner() -> OwnerInfo {
        OwnerInfo {
            api_version: "syndesis.io/v1beta1".into(),
            kind: "Syndesis".into(),
            name: "app".into(),
            namespace: "ns".into(),
            uid: "o1".into(),
        }
    }

    fn route(spec: JsonValue) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "route.openshift.io/v1", "kind": "Route",
            "metadata": { "name": "syndesis" },
            "spec": spec
        }))
        .unwrap()
    }

    fn gets(store: &MemoryStore) -> usize {
        store.ops().iter().filter(|o| o.verb == Verb::Get).count()
    }

    #[tokio::test]
    async fn host_present_after_create_needs_no_refetch() {
        let store = MemoryStore::openshift();
        store.admit_routes(RouteAdmission::OnCreate("s.apps.example".into()));
        let c = install_route(&store, &owner(), &[route(json!({ "tls": {} }))])
            .await
            .unwrap();
        assert_eq!(c.host(), "s.apps.example");
        assert_eq!(c.application_url(), "https://s.apps.example");
        assert_eq!(gets(&store), 1, "only the upsert lookup");
    }

    #[tokio::test]
    async fn host_on_refetch_is_accepted() {
        let store = MemoryStore::openshift();
        store.admit_routes(RouteAdmission::OnRead("late.apps.example".into()));
        let c = install_route(&store, &owner(), &[route(json!({}))])
            .await
            .unwrap();
        assert_eq!(c.host(), "late.apps.example");
        assert_eq!(c.application_url(), "http://late.apps.example");
        assert!(c.object().metadata.uid.is_some());
        assert_eq!(gets(&store), 2);
    }

    #[tokio::test]
    async fn empty_after_refetch_is_hostname_unavailable() {
        let store = MemoryStore::openshift();
        let err = install_route(&store, &owner(), &[route(json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::HostnameUnavailable { .. }));
        assert_eq!(gets(&store), 2, "exactly one re-fetch");
    }

    #[tokio::test]
    async fn ingress_host_comes_from_rules() {
        let store = MemoryStore::openshift();
        let ingress: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "networking.k8s.io/v1", "kind": "Ingress",
            "metadata": { "name": "syndesis" },
            "spec": {
                "tls": [{ "hosts": ["s.example.com"] }],
                "rules": [{ "host": "s.example.com" }]
            }
        }))
        .unwrap();
        let c = install_route(&store, &owner(), &[ingress]).await.unwrap();
        assert!(matches!(c, Conduit::Ingress(_)));
        assert_eq!(c.application_url(), "https://s.example.com");
    }

    #[tokio::test]
    async fn missing_endpoint_and_store_errors_are_hard() {
        let store = MemoryStore::openshift();
        let err = install_route(&store, &owner(), &[]).await.unwrap_err();
        assert!(matches!(err, InstallError::EndpointNotFound(_)));

        store.fail(Verb::Create, Some("Route"), None, crate::store::StoreErrorKind::Forbidden);
        let err = install_route(&store, &owner(), &[route(json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Store(_)));
    }
}
