use std::fmt;

use kube::core::DynamicObject;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::store::{ObjectStore, StoreError, TypeDescriptor, object_name, object_namespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
            OperationResult::Unchanged => "unchanged",
        })
    }
}

/// Kinds whose live copy is kept once it exists: the platform writes
/// tokens into service accounts and hosts into routes.
fn preserved(target: &TypeDescriptor) -> bool {
    matches!(
        (target.api_version.as_str(), target.kind.as_str()),
        ("v1", "ServiceAccount")
    ) || (target.group() == "route.openshift.io" && target.kind == "Route")
}

/// Overlay `desired` onto `live`: objects merge key by key, anything else
/// is replaced.
pub(crate) fn merge_into(live: &mut JsonValue, desired: &JsonValue) {
    match (live, desired) {
        (JsonValue::Object(l), JsonValue::Object(d)) => {
            for (k, dv) in d {
                match l.get_mut(k) {
                    Some(lv) if lv.is_object() && dv.is_object() => {
                        merge_into(lv, dv)
                    }
                    _ => {
                        l.insert(k.clone(), dv.clone());
                    }
                }
            }
        }
        (l, d) => *l = d.clone(),
    }
}

/// True when every field `desired` sets already holds the same value in
/// `live`. Arrays match element by element; fields only `live` has (such as
/// server defaults) are ignored.
pub(crate) fn contained_in(desired: &JsonValue, live: &JsonValue) -> bool {
    match (desired, live) {
        (JsonValue::Object(d), JsonValue::Object(l)) => d.iter().all(|(k, dv)| {
            match l.get(k) {
                Some(lv) => contained_in(dv, lv),
                None => dv.is_null(),
            }
        }),
        (JsonValue::Array(d), JsonValue::Array(l)) => {
            d.len() == l.len()
                && d.iter().zip(l).all(|(dv, lv)| contained_in(dv, lv))
        }
        (d, l) => d == l,
    }
}

/// `desired` as a document, without the fields the server owns.
fn desired_doc(desired: &DynamicObject) -> Result<JsonValue, StoreError> {
    let mut want = serde_json::to_value(desired)?;
    if let Some(w) = want.as_object_mut() {
        w.remove("status");
        if let Some(meta) = w.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("resourceVersion");
            meta.remove("uid");
        }
    }
    Ok(want)
}

/// Create `desired` or bring the live object in line with it.
///
/// The returned object is what the store holds afterwards and always carries
/// the UID.
pub async fn create_or_update(
    store: &dyn ObjectStore,
    desired: &DynamicObject,
) -> Result<(DynamicObject, OperationResult), StoreError> {
    let target = TypeDescriptor::of(desired)?;
    let name = object_name(desired)?;
    let namespace = object_namespace(desired);

    let live = match store.get(&target, namespace, name).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => {
            let created = store.create(desired).await?;
            return Ok((created, OperationResult::Created));
        }
        Err(e) => return Err(e),
    };

    if preserved(&target) {
        trace!(%target, %name, "keeping platform-managed object");
        return Ok((live, OperationResult::Unchanged));
    }

    let want = desired_doc(desired)?;
    let mut doc = serde_json::to_value(&live)?;
    if contained_in(&want, &doc) {
        return Ok((live, OperationResult::Unchanged));
    }
    merge_into(&mut doc, &want);
    let next: DynamicObject = serde_json::from_value(doc)?;
    let updated = store.update(&next).await?;
    Ok((updated, OperationResult::Updated))
}
