use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kube::core::DynamicObject;
use serde::Deserialize;
use tracing::trace;

use super::{RenderConfig, Renderer, TemplateError, dir_key};

/// Loads multi-document YAML manifests from `<root>/<dir>`, in file-name
/// order, after substituting `{{Key}}` placeholders.
#[derive(Clone, Debug)]
pub struct ManifestRenderer {
    root: PathBuf,
}

impl ManifestRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_path(&self, dir: &str) -> PathBuf {
        self.root.join(dir_key(dir))
    }

    fn manifest_files(&self, dir: &str) -> Result<Vec<PathBuf>, TemplateError> {
        let path = self.dir_path(dir);
        if !path.is_dir() {
            return Err(TemplateError::MissingDir(dir.to_string()));
        }
        let entries = std::fs::read_dir(&path).map_err(|source| {
            TemplateError::Io {
                path: path.clone(),
                source,
            }
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
            let p = entry.path();
            let is_yaml = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if p.is_file() && is_yaml {
                files.push(p);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Replace every `{{Key}}` in `text`; unknown keys are an error.
pub fn substitute(
    path: &Path,
    text: &str,
    values: &BTreeMap<&'static str, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Unterminated {
                path: path.to_path_buf(),
            });
        };
        let key = after[..end].trim();
        let value = values.get(key).ok_or_else(|| {
            TemplateError::UnknownPlaceholder {
                path: path.to_path_buf(),
                key: key.to_string(),
            }
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn parse_documents(
    path: &Path,
    text: &str,
) -> Result<Vec<DynamicObject>, TemplateError> {
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc).map_err(|source| {
            TemplateError::Yaml {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value).map_err(|e| {
            TemplateError::Invalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        let obj: DynamicObject =
            serde_json::from_value(json).map_err(|e| TemplateError::Invalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let typed = obj
            .types
            .as_ref()
            .is_some_and(|t| !t.api_version.is_empty() && !t.kind.is_empty());
        if !typed || obj.metadata.name.is_none() {
            return Err(TemplateError::Invalid {
                path: path.to_path_buf(),
                message: "manifest needs apiVersion, kind and metadata.name"
                    .into(),
            });
        }
        objects.push(obj);
    }
    Ok(objects)
}

impl Renderer for ManifestRenderer {
    fn render(
        &self,
        dir: &str,
        cfg: &RenderConfig,
    ) -> Result<Vec<DynamicObject>, TemplateError> {
        let values = cfg.values();
        let mut out = Vec::new();
        for file in self.manifest_files(dir)? {
            let raw = std::fs::read_to_string(&file).map_err(|source| {
                TemplateError::Io {
                    path: file.clone(),
                    source,
                }
            })?;
            let text = substitute(&file, &raw, &values)?;
            let docs = parse_documents(&file, &text)?;
            trace!(file = %file.display(), count = docs.len(), "rendered manifests");
            out.extend(docs);
        }
        Ok(out)
    }

    fn has_dir(&self, dir: &str) -> bool {
        self.dir_path(dir).is_dir()
    }
}
