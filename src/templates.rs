//! Template System - Versioned Artifact Sources

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::EngineError;

pub type TemplateId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Base64 encoded workflow body.
    pub value: String,
    #[serde(default)]
    pub pipelines: Vec<EncodedBody>,
    #[serde(default)]
    pub applications: Vec<EncodedBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterType {
    #[default]
    String,
    Boolean,
    Repository,
    SshKey,
    PgpKey,
}

/// A base64 encoded pipeline or application body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBody {
    pub value: String,
}

impl EncodedBody {
    pub fn encode(text: &str) -> Self {
        Self {
            value: STANDARD.encode(text),
        }
    }
}

/// Parameters submitted to execute a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Name of the workflow to generate.
    pub name: String,
    #[serde(default, alias = "params")]
    pub parameters: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Content fields a template owner may change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdate {
    #[serde(default)]
    pub description: String,
    pub value: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub pipelines: Vec<EncodedBody>,
    #[serde(default)]
    pub applications: Vec<EncodedBody>,
}

/// The two snapshots of a template around one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRevision {
    pub before: Template,
    pub after: Template,
}

impl Template {
    /// Builds the next version of this template. `self` is left untouched.
    pub fn revise(&self, update: TemplateUpdate) -> TemplateRevision {
        let after = Template {
            id: self.id.clone(),
            group_id: self.group_id.clone(),
            name: self.name.clone(),
            description: update.description,
            version: self.version + 1,
            parameters: update.parameters,
            value: update.value,
            pipelines: update.pipelines,
            applications: update.applications,
        };
        TemplateRevision {
            before: self.clone(),
            after,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.key == key)
    }
}

/// Template registry - loads and caches templates
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |e| e == "json") {
                    let content = fs::read_to_string(&path)?;
                    match serde_json::from_str::<Template>(&content) {
                        Ok(template) => {
                            debug!(id = %template.id, version = template.version, "loaded template");
                            registry.templates.insert(template.id.clone(), template);
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable template"),
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// All templates, ordered by id.
    pub fn list(&self) -> Vec<&Template> {
        let mut all: Vec<_> = self.templates.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Applies an update and stores the new version as current.
    pub fn revise(&mut self, id: &str, update: TemplateUpdate) -> Result<TemplateRevision, EngineError> {
        let current = self
            .templates
            .get(id)
            .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;
        let revision = current.revise(update);
        self.templates.insert(id.to_string(), revision.after.clone());
        Ok(revision)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template {
            id: "go-service".into(),
            group_id: "shared".into(),
            name: "Go service".into(),
            description: String::new(),
            version: 3,
            parameters: vec![ParameterSpec {
                key: "env".into(),
                kind: ParameterType::String,
                required: true,
            }],
            value: STANDARD.encode("name: [[.name]]"),
            pipelines: vec![],
            applications: vec![],
        }
    }

    #[test]
    fn test_revise_bumps_version_and_keeps_before() {
        let original = template();
        let revision = original.revise(TemplateUpdate {
            description: "new".into(),
            value: STANDARD.encode("name: other"),
            ..Default::default()
        });

        assert_eq!(revision.before, original);
        assert_eq!(revision.after.version, 4);
        assert_eq!(revision.after.id, original.id);
        assert_eq!(revision.after.description, "new");
        assert!(revision.after.parameters.is_empty());
    }

    #[test]
    fn test_parameter_type_serde() {
        let spec: ParameterSpec =
            serde_json::from_str(r#"{"key":"k","type":"ssh-key","required":true}"#).unwrap();
        assert_eq!(spec.kind, ParameterType::SshKey);
    }

    #[test]
    fn test_request_accepts_params_alias() {
        let req: ExecutionRequest = serde_json::from_str(r#"{"name":"x","params":{"env":"prod"}}"#).unwrap();
        assert_eq!(req.parameters.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_registry_revise_replaces_current() {
        let mut registry = TemplateRegistry::new();
        registry.register(template());
        let rev = registry
            .revise("go-service", TemplateUpdate { value: "e30=".into(), ..Default::default() })
            .unwrap();
        assert_eq!(registry.get("go-service").unwrap().version, rev.after.version);
        assert!(registry.revise("missing", TemplateUpdate::default()).is_err());
    }

    #[test]
    fn test_load_from_dir_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.json"), serde_json::to_string(&template()).unwrap()).unwrap();
        fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = TemplateRegistry::load_from_dir(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("go-service").is_some());
    }
}
