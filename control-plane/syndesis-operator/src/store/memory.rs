//! In-process [`ObjectStore`] with fault injection, used by the test suites.
//!
//! Behaves like a small API server: UIDs and resource versions are assigned
//! on write, label selectors and pagination are honoured on list, and
//! unknown kinds answer with `NoKindMatch`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde_json::Value as JsonValue;

use super::{
    ObjectPage, ObjectStore, PageRequest, StoreError, StoreErrorKind,
    TypeDescriptor, object_name, object_namespace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
    List,
    Discover,
    Patch,
}

impl Verb {
    fn is_write(self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Delete | Verb::Patch)
    }
}

/// One recorded call against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

/// How the simulated platform fills in `spec.host` on routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RouteAdmission {
    #[default]
    Never,
    /// Host is assigned as part of the create call.
    OnCreate(String),
    /// Host appears the next time the route is read back.
    OnRead(String),
}

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    kind: Option<String>,
    name: Option<String>,
    error: StoreErrorKind,
    remaining: Option<u32>,
}

impl Fault {
    fn matches(&self, verb: Verb, kind: &str, name: &str) -> bool {
        self.verb == verb
            && self.kind.as_deref().is_none_or(|k| k == kind)
            && self.name.as_deref().is_none_or(|n| n == name)
            && self.remaining.is_none_or(|r| r > 0)
    }
}

type ObjKey = (String, String, String, String);

#[derive(Debug, Default)]
struct State {
    kinds: Vec<TypeDescriptor>,
    objects: BTreeMap<ObjKey, DynamicObject>,
    next_uid: u64,
    next_rv: u64,
    faults: Vec<Fault>,
    route_admission: RouteAdmission,
    ops: Vec<StoreOp>,
}

impl State {
    fn record(&mut self, verb: Verb, kind: &str, name: &str) {
        self.ops.push(StoreOp {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    fn check_fault(
        &mut self,
        verb: Verb,
        kind: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        if let Some(f) =
            self.faults.iter_mut().find(|f| f.matches(verb, kind, name))
        {
            if let Some(r) = f.remaining.as_mut() {
                *r -= 1;
            }
            return Err(StoreError::new(
                f.error,
                format!("injected {:?} failure on {verb:?} {kind}/{name}", f.error),
            ));
        }
        Ok(())
    }

    fn served(&self, target: &TypeDescriptor) -> bool {
        self.kinds.iter().any(|k| k.same_kind(target))
    }

    fn require_kind(&self, target: &TypeDescriptor) -> Result<(), StoreError> {
        if self.served(target) {
            Ok(())
        } else {
            Err(StoreError::new(
                StoreErrorKind::NoKindMatch,
                format!("no matches for kind {target}"),
            ))
        }
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn assign_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{:04}", self.next_uid)
    }
}

fn key_of(target: &TypeDescriptor, namespace: &str, name: &str) -> ObjKey {
    (
        target.api_version.clone(),
        target.kind.clone(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn is_route(target: &TypeDescriptor) -> bool {
    target.kind == "Route" && target.group() == "route.openshift.io"
}

fn route_host_missing(obj: &DynamicObject) -> bool {
    obj.data
        .get("spec")
        .and_then(|s| s.get("host"))
        .and_then(|h| h.as_str())
        .is_none_or(str::is_empty)
}

fn set_route_host(obj: &mut DynamicObject, host: &str) {
    if !obj.data.is_object() {
        obj.data = JsonValue::Object(Default::default());
    }
    if let Some(root) = obj.data.as_object_mut() {
        let spec = root
            .entry("spec")
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if let Some(spec) = spec.as_object_mut() {
            spec.insert("host".into(), JsonValue::String(host.to_string()));
        }
    }
}

/// Matches `k=v`, `k==v`, `k!=v` and bare `k` terms joined by commas.
pub fn selector_matches(selector: &str, obj: &DynamicObject) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==") {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store serving the core kinds an install touches, plus OpenShift routes
    /// and the `Syndesis` kind itself.
    pub fn openshift() -> Self {
        let store = Self::new();
        for (api_version, kind) in [
            ("v1", "ConfigMap"),
            ("v1", "Secret"),
            ("v1", "Service"),
            ("v1", "ServiceAccount"),
            ("v1", "PersistentVolumeClaim"),
            ("apps/v1", "Deployment"),
            ("networking.k8s.io/v1", "Ingress"),
            ("rbac.authorization.k8s.io/v1", "Role"),
            ("rbac.authorization.k8s.io/v1", "RoleBinding"),
            ("route.openshift.io/v1", "Route"),
            ("syndesis.io/v1beta1", "Syndesis"),
        ] {
            store.register_kind(TypeDescriptor::new(api_version, kind));
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register_kind(&self, td: TypeDescriptor) {
        let mut st = self.lock();
        st.kinds.retain(|k| !k.same_kind(&td));
        st.kinds.push(td);
    }

    pub fn unregister_kind(&self, api_version: &str, kind: &str) {
        self.lock()
            .kinds
            .retain(|k| !(k.api_version == api_version && k.kind == kind));
    }

    /// Insert an object as if it already existed, assigning UID and
    /// resource version when absent.
    pub fn seed(&self, mut obj: DynamicObject) -> DynamicObject {
        let mut st = self.lock();
        let target = TypeDescriptor::of(&obj).unwrap_or_else(|_| {
            TypeDescriptor::new("v1", "Unknown")
        });
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(st.assign_uid());
        }
        if obj.metadata.resource_version.is_none() {
            obj.metadata.resource_version = Some(st.bump_rv());
        }
        let key = key_of(
            &target,
            object_namespace(&obj),
            obj.metadata.name.as_deref().unwrap_or_default(),
        );
        st.objects.insert(key, obj.clone());
        obj
    }

    /// Fail every matching call with `error`. `None` matches any kind/name.
    pub fn fail(
        &self,
        verb: Verb,
        kind: Option<&str>,
        name: Option<&str>,
        error: StoreErrorKind,
    ) {
        self.lock().faults.push(Fault {
            verb,
            kind: kind.map(str::to_string),
            name: name.map(str::to_string),
            error,
            remaining: None,
        });
    }

    pub fn fail_once(
        &self,
        verb: Verb,
        kind: Option<&str>,
        name: Option<&str>,
        error: StoreErrorKind,
    ) {
        self.lock().faults.push(Fault {
            verb,
            kind: kind.map(str::to_string),
            name: name.map(str::to_string),
            error,
            remaining: Some(1),
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn admit_routes(&self, admission: RouteAdmission) {
        self.lock().route_admission = admission;
    }

    pub fn find(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .objects
            .iter()
            .find(|((_, k, _, n), _)| k == kind && n == name)
            .map(|(_, o)| o.clone())
    }

    pub fn objects(&self) -> Vec<DynamicObject> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(_, k, _, _)| k == kind)
            .count()
    }

    /// Overwrite (or add) a JSON pointer inside a stored object, bypassing
    /// resource versions.
    pub fn set_field(
        &self,
        kind: &str,
        name: &str,
        pointer: &str,
        value: JsonValue,
    ) -> bool {
        let mut st = self.lock();
        let Some(obj) = st
            .objects
            .iter_mut()
            .find(|((_, k, _, n), _)| k == kind && n == name)
            .map(|(_, o)| o)
        else {
            return false;
        };
        let Ok(mut doc) = serde_json::to_value(&*obj) else {
            return false;
        };
        if let Some(slot) = doc.pointer_mut(pointer) {
            *slot = value;
        } else {
            let Some((parent, leaf)) = pointer.rsplit_once('/') else {
                return false;
            };
            let Some(parent) =
                doc.pointer_mut(parent).and_then(|p| p.as_object_mut())
            else {
                return false;
            };
            parent.insert(leaf.to_string(), value);
        }
        match serde_json::from_value(doc) {
            Ok(updated) => {
                *obj = updated;
                true
            }
            Err(_) => false,
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    /// Recorded create/update/delete/patch calls.
    pub fn writes(&self) -> Vec<StoreOp> {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.verb.is_write())
            .cloned()
            .collect()
    }

    pub fn list_calls(&self, kind: &str) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.verb == Verb::List && op.kind == kind)
            .count()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    fn apply_patch_doc(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        apply: impl FnOnce(&mut JsonValue) -> Result<(), StoreError>,
    ) -> Result<DynamicObject, StoreError> {
        let mut st = self.lock();
        st.record(Verb::Patch, &target.kind, name);
        st.check_fault(Verb::Patch, &target.kind, name)?;
        st.require_kind(target)?;
        let key = key_of(target, namespace, name);
        let current = st.objects.get(&key).cloned().ok_or_else(|| {
            StoreError::not_found(format!("{target} {namespace}/{name}"))
        })?;
        let mut doc = serde_json::to_value(&current)?;
        apply(&mut doc)?;
        let mut patched: DynamicObject = serde_json::from_value(doc)?;
        patched.metadata.uid = current.metadata.uid.clone();
        patched.metadata.resource_version = Some(st.bump_rv());
        st.objects.insert(key, patched.clone());
        Ok(patched)
    }
}

fn check_rv_precondition(
    doc: &JsonValue,
    patch: &JsonValue,
) -> Result<(), StoreError> {
    let wanted = patch
        .pointer("/metadata/resourceVersion")
        .and_then(|v| v.as_str());
    let actual = doc
        .pointer("/metadata/resourceVersion")
        .and_then(|v| v.as_str());
    match (wanted, actual) {
        (Some(w), Some(a)) if w != a => Err(StoreError::new(
            StoreErrorKind::Conflict,
            format!("resourceVersion {w} does not match {a}"),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let mut st = self.lock();
        st.record(Verb::Get, &target.kind, name);
        st.check_fault(Verb::Get, &target.kind, name)?;
        st.require_kind(target)?;
        let key = key_of(target, namespace, name);
        let admission = st.route_admission.clone();
        let obj = st.objects.get_mut(&key).ok_or_else(|| {
            StoreError::not_found(format!("{target} {namespace}/{name}"))
        })?;
        if let RouteAdmission::OnRead(host) = &admission {
            if is_route(target) && route_host_missing(obj) {
                set_route_host(obj, host);
            }
        }
        Ok(obj.clone())
    }

    async fn create(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let name = object_name(obj)?.to_string();
        let mut st = self.lock();
        st.record(Verb::Create, &target.kind, &name);
        st.check_fault(Verb::Create, &target.kind, &name)?;
        st.require_kind(&target)?;
        let key = key_of(&target, object_namespace(obj), &name);
        if st.objects.contains_key(&key) {
            return Err(StoreError::new(
                StoreErrorKind::Conflict,
                format!("{target} {name} already exists"),
            ));
        }
        let mut created = obj.clone();
        created.metadata.uid = Some(st.assign_uid());
        created.metadata.resource_version = Some(st.bump_rv());
        if let RouteAdmission::OnCreate(host) = &st.route_admission {
            if is_route(&target) && route_host_missing(&created) {
                set_route_host(&mut created, host);
            }
        }
        st.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let name = object_name(obj)?.to_string();
        let mut st = self.lock();
        st.record(Verb::Update, &target.kind, &name);
        st.check_fault(Verb::Update, &target.kind, &name)?;
        st.require_kind(&target)?;
        let key = key_of(&target, object_namespace(obj), &name);
        let current = st.objects.get(&key).cloned().ok_or_else(|| {
            StoreError::not_found(format!("{target} {name}"))
        })?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if current.metadata.resource_version.as_deref() != Some(rv) {
                return Err(StoreError::new(
                    StoreErrorKind::Conflict,
                    format!("{target} {name}: stale resourceVersion {rv}"),
                ));
            }
        }
        let mut updated = obj.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.resource_version = Some(st.bump_rv());
        st.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<(), StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let name = object_name(obj)?.to_string();
        let mut st = self.lock();
        st.record(Verb::Delete, &target.kind, &name);
        st.check_fault(Verb::Delete, &target.kind, &name)?;
        let key = key_of(&target, object_namespace(obj), &name);
        match st.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(format!("{target} {name}"))),
        }
    }

    async fn list(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        page: &PageRequest,
    ) -> Result<ObjectPage, StoreError> {
        let mut st = self.lock();
        st.record(Verb::List, &target.kind, "");
        st.check_fault(Verb::List, &target.kind, "")?;
        if !st.served(target) {
            return Err(StoreError::not_found(format!(
                "the server could not find the requested resource {target}"
            )));
        }
        // BTreeMap order is (apiVersion, kind, namespace, name), so the
        // continue token can resume after the last key handed out.
        let resume_after = page
            .continue_token
            .as_deref()
            .map(|t| {
                t.split_once('/').ok_or_else(|| {
                    StoreError::new(
                        StoreErrorKind::Other,
                        format!("invalid continue token {t}"),
                    )
                })
            })
            .transpose()?;
        let mut matching = st
            .objects
            .iter()
            .filter(|((av, k, ns, _), _)| {
                av == &target.api_version
                    && k == &target.kind
                    && (namespace.is_empty() || ns == namespace)
            })
            .filter(|((_, _, ns, name), _)| match resume_after {
                Some((rns, rname)) => {
                    (ns.as_str(), name.as_str()) > (rns, rname)
                }
                None => true,
            })
            .map(|(_, o)| o)
            .filter(|o| selector_matches(&page.label_selector, o));
        let limit = if page.limit == 0 {
            usize::MAX
        } else {
            page.limit as usize
        };
        let items: Vec<DynamicObject> =
            matching.by_ref().take(limit).cloned().collect();
        let continue_token = match (matching.next(), items.last()) {
            (Some(_), Some(last)) => Some(format!(
                "{}/{}",
                object_namespace(last),
                last.metadata.name.as_deref().unwrap_or_default()
            )),
            _ => None,
        };
        Ok(ObjectPage {
            items,
            continue_token,
        })
    }

    async fn discover_namespaced_types(
        &self,
    ) -> Result<Vec<TypeDescriptor>, StoreError> {
        let mut st = self.lock();
        st.record(Verb::Discover, "", "");
        st.check_fault(Verb::Discover, "", "")?;
        Ok(st.kinds.clone())
    }

    async fn patch_json(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        ops: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError> {
        self.apply_patch_doc(target, namespace, name, |doc| {
            json_patch::patch(doc, &ops.0).map_err(|e| {
                StoreError::new(
                    StoreErrorKind::Other,
                    format!("json patch rejected: {e}"),
                )
            })
        })
    }

    async fn patch_merge(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError> {
        self.apply_patch_doc(target, namespace, name, |doc| {
            check_rv_precondition(doc, patch)?;
            json_patch::merge(doc, patch);
            Ok(())
        })
    }

    async fn patch_status(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError> {
        self.apply_patch_doc(target, namespace, name, |doc| {
            check_rv_precondition(doc, patch)?;
            if let Some(status) = patch.get("status") {
                let scoped = serde_json::json!({ "status": status });
                json_patch::merge(doc, &scoped);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cm(name: &str, labels: JsonValue) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "ns", "labels": labels },
            "data": { "k": "v" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_assigns_uid_and_rejects_duplicates() {
        let store = MemoryStore::openshift();
        let created = store.create(&cm("a", json!({}))).await.unwrap();
        assert!(created.metadata.uid.is_some());
        let err = store.create(&cm("a", json!({}))).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_with_stale_resource_version_conflicts() {
        let store = MemoryStore::openshift();
        let created = store.create(&cm("a", json!({}))).await.unwrap();
        let mut first = created.clone();
        first.data["data"]["k"] = json!("v2");
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.data["data"]["k"] = json!("v3");
        let err = store.update(&stale).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Conflict);
    }

    #[tokio::test]
    async fn unknown_kinds_do_not_match() {
        let store = MemoryStore::new();
        let err = store.create(&cm("a", json!({}))).await.unwrap_err();
        assert!(err.is_no_kind_match());
    }

    #[tokio::test]
    async fn list_honours_selector_and_pages() {
        let store = MemoryStore::openshift();
        for i in 0..5 {
            store.seed(cm(&format!("owned-{i}"), json!({"owner": "u1"})));
        }
        store.seed(cm("other", json!({"owner": "u2"})));
        let td = TypeDescriptor::new("v1", "ConfigMap");

        let mut req = PageRequest {
            label_selector: "owner=u1".into(),
            continue_token: None,
            limit: 2,
        };
        let mut seen = Vec::new();
        loop {
            let page = store.list(&td, "ns", &req).await.unwrap();
            seen.extend(page.items.into_iter().map(|o| o.metadata.name.unwrap()));
            match page.continue_token {
                Some(t) => req.continue_token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        assert!(!seen.contains(&"other".to_string()));
        assert_eq!(store.list_calls("ConfigMap"), 3);
    }

    #[test]
    fn selector_terms() {
        let o = cm("a", json!({"owner": "u1", "app": "syndesis"}));
        assert!(selector_matches("owner=u1", &o));
        assert!(selector_matches("owner==u1,app", &o));
        assert!(selector_matches("owner!=u2", &o));
        assert!(!selector_matches("owner=u2", &o));
        assert!(!selector_matches("missing", &o));
        assert!(selector_matches("", &o));
    }

    #[tokio::test]
    async fn status_patch_checks_resource_version_and_ignores_spec() {
        let store = MemoryStore::openshift();
        let owner: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "syndesis.io/v1beta1",
            "kind": "Syndesis",
            "metadata": { "name": "app", "namespace": "ns" },
            "spec": {},
            "status": { "phase": "Installing" }
        }))
        .unwrap();
        let owner = store.seed(owner);
        let td = TypeDescriptor::new("syndesis.io/v1beta1", "Syndesis");
        let rv = owner.metadata.resource_version.clone().unwrap();

        let patched = store
            .patch_status(
                &td,
                "ns",
                "app",
                &json!({
                    "metadata": { "resourceVersion": rv },
                    "spec": { "ignored": true },
                    "status": { "phase": "Starting" }
                }),
            )
            .await
            .unwrap();
        assert_eq!(patched.data["status"]["phase"], "Starting");
        assert!(patched.data["spec"].get("ignored").is_none());

        let err = store
            .patch_status(
                &td,
                "ns",
                "app",
                &json!({
                    "metadata": { "resourceVersion": rv },
                    "status": { "phase": "Installed" }
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Conflict);
    }
}
