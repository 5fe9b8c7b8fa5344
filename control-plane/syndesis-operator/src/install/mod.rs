//! The install pass: upsert everything the templates describe, sweep what
//! the owner no longer wants, then advance the owner's phase.

pub mod action;
pub mod discovery;
pub mod ownership;
pub mod phase;
pub mod route;
pub mod scanner;
pub mod sweep;
pub mod upgrade;
pub mod upsert;


use std::collections::HashSet;

use kube::core::DynamicObject;

use crate::crd::SyndesisPhase;
use crate::store::StoreError;
use crate::templates::TemplateError;

pub use action::{InstallAction, InstallSettings};
pub use sweep::{KindWarnings, SweepReport};

/// UIDs of every resource this pass created or confirmed.
#[derive(Debug, Default, Clone)]
pub struct ShouldExist(HashSet<String>);

impl ShouldExist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: &DynamicObject) -> Result<(), InstallError> {
        let uid = obj.metadata.uid.clone().ok_or_else(|| {
            InstallError::MissingUid(
                obj.metadata.name.clone().unwrap_or_default(),
            )
        })?;
        self.0.insert(uid);
        Ok(())
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.0.contains(uid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("hostname still not present on route {name}")]
    HostnameUnavailable { name: String },
    #[error("exposed endpoint {0} not found in rendered manifests")]
    EndpointNotFound(String),
    #[error("store returned {0} without a uid")]
    MissingUid(String),
}

impl InstallError {
    /// Errors that will not clear up by retrying without an owner change.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            InstallError::Template(_)
                | InstallError::Config(_)
                | InstallError::EndpointNotFound(_)
        )
    }
}

/// How a pass that did not fail ended.
#[derive(Debug)]
pub enum PassOutcome {
    Completed {
        transition: Option<SyndesisPhase>,
        report: SweepReport,
    },
    /// The OAuth service account has no token yet.
    AwaitingToken,
    /// The route was created but the platform has not assigned a host.
    AwaitingHostname,
}

impl PassOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, PassOutcome::Completed { .. })
    }
}
