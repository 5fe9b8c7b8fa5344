#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kube::core::DynamicObject;
use serde_json::{Value as JsonValue, json};
use syndesis_operator::clock::ManualClock;
use syndesis_operator::credentials::StaticTokenSource;
use syndesis_operator::crd::Syndesis;
use syndesis_operator::install::{InstallAction, InstallSettings, KindWarnings};
use syndesis_operator::store::MemoryStore;
use syndesis_operator::store::memory::Verb;
use syndesis_operator::templates::StaticRenderer;

pub const NS: &str = "syndesis";
pub const OWNER_NAME: &str = "app";
pub const OWNER_UID: &str = "owner-uid";
pub const ROUTE_HOST: &str = "syndesis.apps.example.com";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn obj(v: JsonValue) -> DynamicObject {
    serde_json::from_value(v).expect("valid object")
}

fn to_owner(o: DynamicObject) -> Syndesis {
    serde_json::from_value(serde_json::to_value(o).expect("serialize"))
        .expect("syndesis owner")
}

/// Put the owner into the store and return it as the controller would see it.
pub fn seed_owner(store: &MemoryStore, phase: &str, spec: JsonValue) -> Syndesis {
    to_owner(store.seed(obj(json!({
        "apiVersion": "syndesis.io/v1beta1",
        "kind": "Syndesis",
        "metadata": { "name": OWNER_NAME, "namespace": NS, "uid": OWNER_UID },
        "spec": spec,
        "status": { "phase": phase }
    }))))
}

pub fn current_owner(store: &MemoryStore) -> Syndesis {
    to_owner(store.find("Syndesis", OWNER_NAME).expect("owner present"))
}

pub fn route() -> DynamicObject {
    obj(json!({
        "apiVersion": "route.openshift.io/v1", "kind": "Route",
        "metadata": { "name": "syndesis", "labels": { "app": "syndesis" } },
        "spec": {
            "to": { "kind": "Service", "name": "syndesis-oauthproxy" },
            "tls": { "termination": "edge" }
        }
    }))
}

pub fn infrastructure() -> Vec<DynamicObject> {
    vec![
        obj(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": { "name": "syndesis-server-config" },
            "data": { "application.yml": "server: {}" }
        })),
        obj(json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": { "name": "syndesis-server" },
            "spec": { "ports": [{ "port": 80, "targetPort": 8080 }] }
        })),
        obj(json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": { "name": "syndesis-server" },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "syndesis.io/component": "syndesis-server" } },
                "template": { "spec": { "containers": [
                    { "name": "syndesis-server", "image": "syndesis/syndesis-server:latest" }
                ]}}
            }
        })),
    ]
}

/// Route plus three infrastructure objects; the OAuth service account is
/// created by the pass itself.
pub fn five_resources() -> StaticRenderer {
    StaticRenderer::new()
        .with("route", vec![route()])
        .with("infrastructure", infrastructure())
        .with("database", vec![])
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub warnings: Arc<KindWarnings>,
    pub action: InstallAction,
}

pub fn harness(
    store: Arc<MemoryStore>,
    renderer: StaticRenderer,
    token: Option<&str>,
) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let warnings =
        Arc::new(KindWarnings::new(clock.clone(), Duration::from_secs(3600)));
    let action = InstallAction::new(
        store.clone(),
        Arc::new(renderer),
        Arc::new(StaticTokenSource(token.map(str::to_string))),
        clock.clone(),
        warnings.clone(),
        InstallSettings::default(),
    );
    Harness {
        store,
        clock,
        warnings,
        action,
    }
}

pub fn openshift_store() -> Arc<MemoryStore> {
    let store = MemoryStore::openshift();
    store.admit_routes(syndesis_operator::store::memory::RouteAdmission::OnCreate(
        ROUTE_HOST.into(),
    ));
    Arc::new(store)
}

pub fn count_ops(store: &MemoryStore, verb: Verb) -> usize {
    store.ops().iter().filter(|op| op.verb == verb).count()
}

pub fn is_owned(o: &DynamicObject) -> bool {
    o.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get("owner"))
        .is_some_and(|v| v == OWNER_UID)
        && o.metadata
            .owner_references
            .as_deref()
            .and_then(|r| r.first())
            .is_some_and(|r| r.uid == OWNER_UID)
}
