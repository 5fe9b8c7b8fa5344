//! Desired-resource rendering.
//!
//! A renderer turns one template directory (`route/`, `infrastructure/`,
//! `database/`, `addons/<name>/`) into a list of manifests, given the
//! [`RenderConfig`] built for the current pass.

pub mod manifest;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use kube::core::DynamicObject;

use crate::crd::Syndesis;

pub use manifest::ManifestRenderer;

const DEFAULT_DATABASE_URL: &str =
    "postgresql://syndesis-db:5432/syndesis?sslmode=disable";
const DEFAULT_VOLUME_ACCESS_MODE: &str = "ReadWriteOnce";

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("template directory not found: {0}")]
    MissingDir(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: unknown placeholder {{{{{key}}}}}")]
    UnknownPlaceholder { path: PathBuf, key: String },
    #[error("{path}: unterminated placeholder")]
    Unterminated { path: PathBuf },
    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Values the templates may reference, derived from the owner plus what the
/// pass has learnt so far (token, route host).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderConfig {
    pub namespace: String,
    /// Whether the cluster serves `route.openshift.io` routes.
    pub routes_supported: bool,
    pub route_hostname: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub image_pull_secrets: Vec<String>,
    pub external_db_url: Option<String>,
    pub volume_access_mode: Option<String>,
    pub volume_name: Option<String>,
    pub volume_storage_class: Option<String>,
    pub addons: Vec<String>,
}

impl RenderConfig {
    pub fn from_owner(owner: &Syndesis, routes_supported: bool) -> Self {
        let db = &owner.spec.components.database;
        Self {
            namespace: owner.metadata.namespace.clone().unwrap_or_default(),
            routes_supported,
            route_hostname: owner
                .spec
                .route_hostname
                .clone()
                .filter(|h| !h.is_empty()),
            oauth_client_secret: None,
            image_pull_secrets: Vec::new(),
            external_db_url: owner.external_db_url().map(str::to_string),
            volume_access_mode: db.resources.volume_access_mode.clone(),
            volume_name: db.resources.volume_name.clone(),
            volume_storage_class: db.resources.volume_storage_class.clone(),
            addons: owner
                .enabled_addons()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Without routes nothing assigns a hostname, so the owner must.
    pub fn missing_route_hostname(&self) -> bool {
        !self.routes_supported && self.route_hostname.is_none()
    }

    pub fn set_route(&mut self, host: impl Into<String>) {
        let host = host.into();
        if !host.is_empty() {
            self.route_hostname = Some(host);
        }
    }

    pub fn volume_access_mode(&self) -> &str {
        self.volume_access_mode
            .as_deref()
            .unwrap_or(DEFAULT_VOLUME_ACCESS_MODE)
    }

    /// Placeholder table for `{{Key}}` substitution.
    pub fn values(&self) -> BTreeMap<&'static str, String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        BTreeMap::from([
            ("Namespace", self.namespace.clone()),
            ("RouteHostname", opt(&self.route_hostname)),
            ("OAuthClientSecret", opt(&self.oauth_client_secret)),
            ("ImagePullSecrets", self.image_pull_secrets.join(",")),
            (
                "DatabaseUrl",
                self.external_db_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            ),
            (
                "DatabaseVolumeAccessMode",
                self.volume_access_mode().to_string(),
            ),
            ("DatabaseVolumeName", opt(&self.volume_name)),
            ("DatabaseStorageClass", opt(&self.volume_storage_class)),
        ])
    }
}

pub trait Renderer: Send + Sync {
    fn render(
        &self,
        dir: &str,
        cfg: &RenderConfig,
    ) -> Result<Vec<DynamicObject>, TemplateError>;

    fn has_dir(&self, dir: &str) -> bool;
}

pub(crate) fn dir_key(dir: &str) -> &str {
    dir.trim_start_matches("./").trim_matches('/')
}

/// Renderer returning fixed manifests per directory; placeholders are not
/// evaluated.
#[derive(Clone, Debug, Default)]
pub struct StaticRenderer {
    dirs: HashMap<String, Vec<DynamicObject>>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, dir: &str, objects: Vec<DynamicObject>) -> Self {
        self.dirs.insert(dir_key(dir).to_string(), objects);
        self
    }
}

impl Renderer for StaticRenderer {
    fn render(
        &self,
        dir: &str,
        cfg: &RenderConfig,
    ) -> Result<Vec<DynamicObject>, TemplateError> {
        let _ = cfg;
        self.dirs
            .get(dir_key(dir))
            .cloned()
            .ok_or_else(|| TemplateError::MissingDir(dir.to_string()))
    }

    fn has_dir(&self, dir: &str) -> bool {
        self.dirs.contains_key(dir_key(dir))
    }
}
