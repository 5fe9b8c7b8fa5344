use tracing::debug;

use crate::store::{ObjectStore, StoreError};

pub use crate::store::TypeDescriptor;

/// Every namespaced kind the store serves right now, deduplicated and in a
/// stable order. Never cached across passes.
pub async fn discover_namespaced_types(
    store: &dyn ObjectStore,
) -> Result<Vec<TypeDescriptor>, StoreError> {
    let mut types = store.discover_namespaced_types().await?;
    types.sort();
    types.dedup_by(|a, b| a.same_kind(b));
    debug!(count = types.len(), "discovered kinds");
    Ok(types)
}

/// Whether discovery reported OpenShift routes.
pub fn serves_routes(types: &[TypeDescriptor]) -> bool {
    types
        .iter()
        .any(|t| t.group() == "route.openshift.io" && t.kind == "Route")
}
