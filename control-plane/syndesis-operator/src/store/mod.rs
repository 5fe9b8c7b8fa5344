//! Backing object store seam.
//!
//! The install pass only talks to the cluster through [`ObjectStore`]. The
//! production adapter is [`KubeStore`]; [`MemoryStore`] keeps everything
//! in-process for tests.

pub mod descriptor;
pub mod kube_store;
pub mod memory;

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde_json::Value as JsonValue;

pub use descriptor::TypeDescriptor;
pub use kube_store::KubeStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    NotFound,
    Forbidden,
    MethodNotSupported,
    Conflict,
    /// The store has no kind registered for the requested apiVersion/kind.
    NoKindMatch,
    Other,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    pub fn is_no_kind_match(&self) -> bool {
        self.kind == StoreErrorKind::NoKindMatch
    }

    /// Errors that mean "this kind does not apply here" when listing.
    pub fn is_inapplicable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::NotFound
                | StoreErrorKind::Forbidden
                | StoreErrorKind::MethodNotSupported
        )
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        let kind = match &e {
            kube::Error::Api(ae) => match ae.code {
                404 => StoreErrorKind::NotFound,
                403 => StoreErrorKind::Forbidden,
                405 => StoreErrorKind::MethodNotSupported,
                409 => StoreErrorKind::Conflict,
                _ => StoreErrorKind::Other,
            },
            kube::Error::Discovery(_) => StoreErrorKind::NoKindMatch,
            _ => StoreErrorKind::Other,
        };
        StoreError::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::new(StoreErrorKind::Other, format!("serde: {e}"))
    }
}

/// Parameters of one paginated list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub label_selector: String,
    pub continue_token: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub items: Vec<DynamicObject>,
    /// Present while the store has more pages to hand out.
    pub continue_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject, StoreError>;

    async fn create(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace an existing object; `metadata.resourceVersion` is the
    /// optimistic-concurrency precondition.
    async fn update(
        &self,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    async fn delete(&self, obj: &DynamicObject) -> Result<(), StoreError>;

    async fn list(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        page: &PageRequest,
    ) -> Result<ObjectPage, StoreError>;

    /// Every namespaced kind the store currently serves.
    async fn discover_namespaced_types(
        &self,
    ) -> Result<Vec<TypeDescriptor>, StoreError>;

    async fn patch_json(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        ops: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch against the main resource.
    async fn patch_merge(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError>;

    /// JSON merge patch against the `status` sub-resource.
    async fn patch_status(
        &self,
        target: &TypeDescriptor,
        namespace: &str,
        name: &str,
        patch: &JsonValue,
    ) -> Result<DynamicObject, StoreError>;
}

pub(crate) fn object_name(obj: &DynamicObject) -> Result<&str, StoreError> {
    obj.metadata.name.as_deref().ok_or_else(|| {
        StoreError::new(StoreErrorKind::Other, "object has no metadata.name")
    })
}

pub(crate) fn object_namespace(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inapplicable_kinds_are_the_skip_set() {
        for k in [
            StoreErrorKind::NotFound,
            StoreErrorKind::Forbidden,
            StoreErrorKind::MethodNotSupported,
        ] {
            assert!(StoreError::new(k, "x").is_inapplicable(), "{k:?}");
        }
        for k in [
            StoreErrorKind::Conflict,
            StoreErrorKind::NoKindMatch,
            StoreErrorKind::Other,
        ] {
            assert!(!StoreError::new(k, "x").is_inapplicable(), "{k:?}");
        }
    }

    #[test]
    fn kube_api_errors_are_classified_by_status_code() {
        let api_err = |code: u16| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "Test".into(),
                code,
            })
        };
        assert_eq!(StoreError::from(api_err(404)).kind, StoreErrorKind::NotFound);
        assert_eq!(StoreError::from(api_err(403)).kind, StoreErrorKind::Forbidden);
        assert_eq!(
            StoreError::from(api_err(405)).kind,
            StoreErrorKind::MethodNotSupported
        );
        assert_eq!(StoreError::from(api_err(409)).kind, StoreErrorKind::Conflict);
        assert_eq!(StoreError::from(api_err(500)).kind, StoreErrorKind::Other);
    }
}
