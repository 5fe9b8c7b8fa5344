use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{self, ApiResource, Discovery, Scope, verbs};
use kube::Client;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, trace};

use super::{
    ObjectPage, ObjectStore, PageRequest, StoreError, StoreErrorKind,
    TypeDescriptor, object_name, object_namespace,
};

/// [`ObjectStore`] backed by a live API server.
///
/// Kind resolution results are memoised for the lifetime of the store, which
/// the controller builds fresh for every reconcile pass.
pub struct KubeStore {
    client: Client,
    field_manager: String,
    resolved: Mutex<HashMap<GroupVersionKind, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(
        &self,
        target: &TypeDescriptor,
    ) -> Result<(ApiResource, bool), StoreError> {
        let gvk = target.gvk();
        let cached = self
            .resolved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&gvk)
            .cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        // an unserved group answers 404, which must not read as a missing object
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| match StoreError::from(e) {
                e if e.is_not_found() => {
                    StoreError::new(StoreErrorKind::NoKindMatch, e.message)
                }
                e => e,
            })?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        trace!(%target, namespaced, plural = %ar.plural, "resolved kind");
        self.resolved
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(gvk, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.resolve(target).await?;
        if namespaced && !namespace.is_empty() {
            Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(target, namespace).await?;
        let mut obj = api.get(name).await?;
        // the API omits apiVersion/kind on some code paths; keep them stable
        obj.types.get_or_insert_with(|| target.type_meta());
        Ok(obj)
    }

    async fn create(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let api = self.api(&target, object_namespace(obj)).await?;
        let mut created = api.create(&self.post_params(), obj).await?;
        created.types.get_or_insert_with(|| target.type_meta());
        Ok(created)
    }

    async fn update(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let api = self.api(&target, object_namespace(obj)).await?;
        let mut updated = api
            .replace(object_name(obj)?, &self.post_params(), obj)
            .await?;
        updated.types.get_or_insert_with(|| target.type_meta());
        Ok(updated)
    }

    async fn delete(&self, obj: &DynamicObject) -> Result<(), StoreError> {
        let target = TypeDescriptor::of(obj)?;
        let api = self.api(&target, object_namespace(obj)).await?;
        let _ = api
            .delete(object_name(obj)?, &DeleteParams::background())
            .await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self, page), fields(kind = %target))]
    async fn list(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        page: &PageRequest,
    ) -> Result<ObjectPage, StoreError> {
        let api = self.api(target, namespace).await?;
        let mut lp = ListParams::default()
            .labels(&page.label_selector)
            .limit(page.limit);
        if let Some(token) = page.continue_token.as_deref() {
            lp = lp.continue_token(token);
        }
        let list = api.list(&lp).await?;
        let continue_token =
            list.metadata.continue_.filter(|t| !t.is_empty());
        let items = list
            .items
            .into_iter()
            .map(|mut o| {
                o.types.get_or_insert_with(|| target.type_meta());
                o
            })
            .collect();
        Ok(ObjectPage {
            items,
            continue_token,
        })
    }

    async fn discover_namespaced_types(
        &self,
    ) -> Result<Vec<TypeDescriptor>, StoreError> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if !matches!(caps.scope, Scope::Namespaced) {
                    continue;
                }
                out.push(
                    TypeDescriptor::new(ar.api_version.clone(), ar.kind.clone())
                        .with_listable(caps.supports_operation(verbs::LIST)),
                );
            }
        }
        debug!(count = out.len(), "discovered namespaced kinds");
        Ok(out)
    }

    async fn patch_json(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        ops: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(target, namespace).await?;
        let patch: Patch<()> = Patch::Json(ops.clone());
        Ok(api.patch(name, &self.patch_params(), &patch).await?)
    }

    async fn patch_merge(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(target, namespace).await?;
        Ok(api
            .patch(name, &self.patch_params(), &Patch::Merge(patch))
            .await?)
    }

    async fn patch_status(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.api(target, namespace).await?;
        Ok(api
            .patch_status(name, &self.patch_params(), &Patch::Merge(patch))
            .await?)
    }
}
