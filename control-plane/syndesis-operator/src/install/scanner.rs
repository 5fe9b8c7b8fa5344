use async_trait::async_trait;
use kube::core::DynamicObject;
use tracing::debug;

use crate::store::{
    ObjectStore, PageRequest, StoreError, StoreErrorKind, TypeDescriptor,
};

pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Receives one page of a chunked list at a time.
#[async_trait]
pub trait PageHandler: Send {
    async fn handle(&mut self, page: Vec<DynamicObject>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { pages: usize, objects: usize },
    /// The kind does not apply here (not found, forbidden, no `list`, or
    /// no longer served).
    Skipped(StoreErrorKind),
}

/// List `target` in pages of `page_size`, handing each page to `handler`
/// before requesting the next one.
pub async fn list_in_chunks(
    store: &dyn ObjectStore,
    target: &TypeDescriptor,
    namespace: &str,
    selector: &str,
    page_size: u32,
    handler: &mut dyn PageHandler,
) -> Result<ScanOutcome, StoreError> {
    let mut req = PageRequest {
        label_selector: selector.to_string(),
        continue_token: None,
        limit: page_size.max(1),
    };
    let mut pages = 0;
    let mut objects = 0;
    loop {
        let page = match store.list(target, namespace, &req).await {
            Ok(page) => page,
            // kinds may disappear between discovery and listing
            Err(e) if e.is_inapplicable() || e.is_no_kind_match() => {
                debug!(%target, error = %e, "skipping kind");
                return Ok(ScanOutcome::Skipped(e.kind));
            }
            Err(e) => return Err(e),
        };
        pages += 1;
        objects += page.items.len();
        handler.handle(page.items).await?;
        match page.continue_token {
            Some(token) => req.continue_token = Some(token),
            None => return Ok(ScanOutcome::Completed { pages, objects }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::memory::Verb;
    use serde_json::json;

    #[derive(Default)]
    struct Collect {
        pages: Vec<usize>,
        names: Vec<String>,
    }

    #[async_trait]
    impl PageHandler for Collect {
        async fn handle(
            &mut self,
            page: Vec<DynamicObject>,
        ) -> Result<(), StoreError> {
            self.pages.push(page.len());
            self.names
                .extend(page.into_iter().filter_map(|o| o.metadata.name));
            Ok(())
        }
    }

    fn seed(store: &MemoryStore, n: usize) {
        for i in 0..n {
            store.seed(
                serde_json::from_value(json!({
                    "apiVersion": "v1", "kind": "ConfigMap",
                    "metadata": {
                        "name": format!("cm-{i:04}"), "namespace": "ns",
                        "labels": { "owner": "o1" }
                    }
                }))
                .unwrap(),
            );
        }
    }

    #[tokio::test]
    async fn visits_every_object_once_in_ceil_n_over_p_pages() {
        let store = MemoryStore::openshift();
        seed(&store, 450);
        let td = TypeDescriptor::new("v1", "ConfigMap");
        let mut h = Collect::default();
        let out = list_in_chunks(&store, &td, "ns", "owner=o1", 200, &mut h)
            .await
            .unwrap();
        assert_eq!(out, ScanOutcome::Completed { pages: 3, objects: 450 });
        assert_eq!(h.pages, vec![200, 200, 50]);
        let mut names = h.names.clone();
        names.dedup();
        assert_eq!(names.len(), 450);
    }

    #[tokio::test]
    async fn empty_kind_is_one_empty_page() {
        let store = MemoryStore::openshift();
        let td = TypeDescriptor::new("v1", "Secret");
        let mut h = Collect::default();
        let out = list_in_chunks(&store, &td, "ns", "owner=o1", 200, &mut h)
            .await
            .unwrap();
        assert_eq!(out, ScanOutcome::Completed { pages: 1, objects: 0 });
    }

    #[tokio::test]
    async fn inapplicable_failures_skip_the_kind() {
        let store = MemoryStore::openshift();
        store.fail(Verb::List, Some("Secret"), None, StoreErrorKind::Forbidden);
        let td = TypeDescriptor::new("v1", "Secret");
        let mut h = Collect::default();
        let out = list_in_chunks(&store, &td, "ns", "", 200, &mut h)
            .await
            .unwrap();
        assert_eq!(out, ScanOutcome::Skipped(StoreErrorKind::Forbidden));

        let gone = TypeDescriptor::new("example.io/v1", "Gone");
        let out = list_in_chunks(&store, &gone, "ns", "", 200, &mut h)
            .await
            .unwrap();
        assert_eq!(out, ScanOutcome::Skipped(StoreErrorKind::NotFound));
    }

    #[tokio::test]
    async fn kinds_gone_since_discovery_are_skipped() {
        let store = MemoryStore::openshift();
        store.fail(
            Verb::List,
            Some("Route"),
            None,
            StoreErrorKind::NoKindMatch,
        );
        let td = TypeDescriptor::new("route.openshift.io/v1", "Route");
        let mut h = Collect::default();
        let out = list_in_chunks(&store, &td, "ns", "owner=o1", 200, &mut h)
            .await
            .unwrap();
        assert_eq!(out, ScanOutcome::Skipped(StoreErrorKind::NoKindMatch));
        assert!(h.pages.is_empty());
    }

    #[tokio::test]
    async fn other_failures_are_fatal() {
        let store = MemoryStore::openshift();
        store.fail(Verb::List, Some("ConfigMap"), None, StoreErrorKind::Other);
        let td = TypeDescriptor::new("v1", "ConfigMap");
        let mut h = Collect::default();
        assert!(
            list_in_chunks(&store, &td, "ns", "", 200, &mut h)
                .await
                .is_err()
        );
    }
}
