use std::fmt;

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};

use super::{StoreError, StoreErrorKind};

/// One resource kind served by the backing store, as reported by discovery.
///
/// Kinds are never enumerated at compile time: anything the API server
/// advertises becomes a descriptor, including optional extension kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeDescriptor {
    pub api_version: String,
    pub kind: String,
    /// Whether the server advertises the `list` verb for this kind.
    pub listable: bool,
}

impl TypeDescriptor {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            listable: true,
        }
    }

    pub fn with_listable(mut self, listable: bool) -> Self {
        self.listable = listable;
        self
    }

    /// Descriptor of an in-memory object, taken from its `apiVersion`/`kind`.
    pub fn of(obj: &DynamicObject) -> Result<Self, StoreError> {
        match obj.types.as_ref() {
            Some(t) if !t.api_version.is_empty() && !t.kind.is_empty() => {
                Ok(Self::new(t.api_version.clone(), t.kind.clone()))
            }
            _ => Err(StoreError::new(
                StoreErrorKind::Other,
                format!(
                    "object {} has no apiVersion/kind",
                    obj.metadata.name.as_deref().unwrap_or("<unnamed>")
                ),
            )),
        }
    }

    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((g, _)) => g,
            None => "",
        }
    }

    pub fn version(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((_, v)) => v,
            None => &self.api_version,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), self.version(), &self.kind)
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
        }
    }

    /// Identity of the kind, ignoring capabilities.
    pub fn key(&self) -> (String, String) {
        (self.api_version.clone(), self.kind.clone())
    }

    pub fn same_kind(&self, other: &TypeDescriptor) -> bool {
        self.api_version == other.api_version && self.kind == other.kind
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}
