use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};

use super::InstallError;
use crate::crd::Syndesis;

/// Label every owned resource carries; its value is the owner's UID.
pub const OWNER_LABEL: &str = "owner";

pub fn owner_label_selector(owner_uid: &str) -> String {
    format!("{OWNER_LABEL}={owner_uid}")
}

/// The parts of the owner the pass needs once it has started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerInfo {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl OwnerInfo {
    pub fn of(owner: &Syndesis) -> Result<Self, InstallError> {
        let uid = owner
            .uid()
            .ok_or_else(|| InstallError::MissingUid(owner.name_any()))?;
        Ok(Self {
            api_version: Syndesis::api_version(&()).to_string(),
            kind: Syndesis::kind(&()).to_string(),
            name: owner.name_any(),
            namespace: owner.namespace().unwrap_or_default(),
            uid,
        })
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Put `obj` in the owner's namespace, make the owner its sole controller
/// and add the ownership label.
pub fn stamp(obj: &mut DynamicObject, owner: &OwnerInfo) {
    obj.metadata.namespace = Some(owner.namespace.clone());
    obj.metadata.owner_references = Some(vec![owner.owner_reference()]);
    obj.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(OWNER_LABEL.to_string(), owner.uid.clone());
}
