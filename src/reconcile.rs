//! Instance Reconciler - which workflow came from which template version
//!
//! Import and instance upsert share one transaction: either every artifact
//! and the instance land, or nothing changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::parse_result;
use crate::error::EngineError;
use crate::execute::{ExecutionResult, TemplateExecutor};
use crate::store::{Store, StoreTransaction};
use crate::templates::{ExecutionRequest, Template, TemplateId, TemplateRegistry};
use crate::validation::check_params;

/// Durable link between a generated workflow and its template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInstance {
    pub id: Uuid,
    pub template_id: TemplateId,
    pub template_version: u64,
    /// Identity of the generated workflow. One instance per workflow.
    pub workflow: String,
    pub request: ExecutionRequest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateInstance {
    pub fn is_stale(&self, template: &Template) -> bool {
        is_stale(self, template)
    }
}

/// True when the template moved past the version the workflow was built from.
pub fn is_stale(instance: &TemplateInstance, template: &Template) -> bool {
    instance.template_version < template.version
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceChange {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub workflow: String,
    pub pipelines: Vec<String>,
    pub applications: Vec<String>,
    pub instance: TemplateInstance,
    /// Instance as it was before this import, if there was one.
    #[serde(default)]
    pub previous: Option<TemplateInstance>,
    pub change: InstanceChange,
}

/// Persists every rendered artifact and upserts the workflow's instance.
pub fn import_result<S: Store>(
    store: &S,
    template: &Template,
    request: &ExecutionRequest,
    result: &ExecutionResult,
) -> Result<ImportReport, EngineError> {
    let parsed = parse_result(&template.id, result)?;

    let mut tx = store.begin()?;

    let mut pipelines = Vec::with_capacity(parsed.pipelines.len());
    for doc in parsed.pipelines {
        pipelines.push(doc.name.clone());
        tx.put_pipeline(doc)?;
    }

    let mut applications = Vec::with_capacity(parsed.applications.len());
    for doc in parsed.applications {
        applications.push(doc.name.clone());
        tx.put_application(doc)?;
    }

    let workflow = tx.put_workflow(parsed.workflow)?;

    let now = Utc::now();
    let previous = tx.instance(&workflow)?;
    let (instance, change) = match previous.clone() {
        Some(existing) => (
            TemplateInstance {
                template_id: template.id.clone(),
                template_version: template.version,
                request: request.clone(),
                updated_at: now,
                ..existing
            },
            InstanceChange::Updated,
        ),
        None => (
            TemplateInstance {
                id: Uuid::new_v4(),
                template_id: template.id.clone(),
                template_version: template.version,
                workflow: workflow.clone(),
                request: request.clone(),
                created_at: now,
                updated_at: now,
            },
            InstanceChange::Created,
        ),
    };
    tx.put_instance(instance.clone())?;
    tx.commit()?;

    info!(
        template = %template.id,
        version = template.version,
        %workflow,
        change = ?change,
        "imported generated workflow"
    );

    Ok(ImportReport {
        workflow,
        pipelines,
        applications,
        instance,
        previous,
        change,
    })
}

/// Execute then import. Nothing is written when rendering fails.
pub fn generate<S: Store>(
    executor: &TemplateExecutor,
    store: &S,
    template: &Template,
    request: &ExecutionRequest,
) -> Result<ImportReport, EngineError> {
    let result = executor.execute(template, request)?;
    import_result(store, template, request, &result)
}

/// Rebuilds a generated workflow against the template's current version.
///
/// The target name on file is kept; stored parameters are merged with
/// `overrides`, which win.
pub fn regenerate<S: Store>(
    executor: &TemplateExecutor,
    store: &S,
    template: &Template,
    workflow: &str,
    overrides: &BTreeMap<String, String>,
) -> Result<ImportReport, EngineError> {
    let instance = store
        .instance(workflow)?
        .ok_or_else(|| EngineError::WorkflowNotGenerated(workflow.to_string()))?;

    if instance.template_id != template.id {
        return Err(EngineError::InvalidParameters(format!(
            "workflow {} was generated from template {}, not {}",
            workflow, instance.template_id, template.id
        )));
    }
    if !instance.is_stale(template) {
        return Err(EngineError::AlreadyLatestTemplate {
            workflow: workflow.to_string(),
            version: instance.template_version,
        });
    }

    let mut request = instance.request.clone();
    request
        .parameters
        .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    check_params(template, &request)?;

    debug!(
        %workflow,
        from = instance.template_version,
        to = template.version,
        "regenerating workflow"
    );
    generate(executor, store, template, &request)
}

/// Instances of `template` that were built from an older version.
pub fn stale_instances<S: Store>(store: &S, template: &Template) -> Result<Vec<TemplateInstance>, EngineError> {
    Ok(store
        .instances_for_template(&template.id)?
        .into_iter()
        .filter(|i| i.is_stale(template))
        .collect())
}

/// For each generated workflow in `workflows`, the template it came from.
/// Hand-authored workflows and unknown templates are left out.
pub fn templates_for_workflows<'r, S: Store>(
    store: &S,
    registry: &'r TemplateRegistry,
    workflows: &[String],
) -> Result<HashMap<String, &'r Template>, EngineError> {
    let mut found = HashMap::new();
    for workflow in workflows {
        if let Some(instance) = store.instance(workflow)? {
            if let Some(template) = registry.get(&instance.template_id) {
                found.insert(workflow.clone(), template);
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::templates::{EncodedBody, ParameterSpec, ParameterType, TemplateUpdate};

    fn template() -> Template {
        Template {
            id: "svc".into(),
            group_id: "g".into(),
            name: "svc".into(),
            description: String::new(),
            version: 1,
            parameters: vec![ParameterSpec {
                key: "env".into(),
                kind: ParameterType::String,
                required: true,
            }],
            value: EncodedBody::encode("name: [[.name]]\nenv: [[.params.env]]").value,
            pipelines: vec![EncodedBody::encode("name: [[.name]]-build")],
            applications: vec![],
        }
    }

    fn bump(t: &Template) -> Template {
        t.revise(TemplateUpdate {
            description: String::new(),
            value: t.value.clone(),
            parameters: t.parameters.clone(),
            pipelines: t.pipelines.clone(),
            applications: t.applications.clone(),
        })
        .after
    }

    #[test]
    fn test_first_generation_creates_instance() {
        let store = MemoryStore::new();
        let req = ExecutionRequest::new("api").with_param("env", "prod");
        let report = generate(&TemplateExecutor::default(), &store, &template(), &req).unwrap();

        assert_eq!(report.change, InstanceChange::Created);
        assert_eq!(report.workflow, "api");
        assert_eq!(report.pipelines, vec!["api-build"]);
        assert_eq!(store.instance("api").unwrap().unwrap(), report.instance);
    }

    #[test]
    fn test_regeneration_updates_in_place() {
        let store = MemoryStore::new();
        let executor = TemplateExecutor::default();
        let v1 = template();
        let req = ExecutionRequest::new("api").with_param("env", "prod");
        let first = generate(&executor, &store, &v1, &req).unwrap();

        let v2 = bump(&v1);
        assert!(first.instance.is_stale(&v2));
        assert_eq!(stale_instances(&store, &v2).unwrap().len(), 1);

        let overrides = BTreeMap::from([("env".to_string(), "staging".to_string())]);
        let second = regenerate(&executor, &store, &v2, "api", &overrides).unwrap();

        assert_eq!(second.change, InstanceChange::Updated);
        assert_eq!(second.instance.id, first.instance.id);
        assert_eq!(second.instance.template_version, 2);
        assert_eq!(second.instance.request.parameters["env"], "staging");
        assert_eq!(store.instance_count().unwrap(), 1);
        assert!(!second.instance.is_stale(&v2));
    }

    #[test]
    fn test_regenerate_refuses_current_and_unknown() {
        let store = MemoryStore::new();
        let executor = TemplateExecutor::default();
        let t = template();
        let req = ExecutionRequest::new("api").with_param("env", "prod");
        generate(&executor, &store, &t, &req).unwrap();

        let err = regenerate(&executor, &store, &t, "api", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyLatestTemplate { version: 1, .. }));

        let err = regenerate(&executor, &store, &t, "hand-written", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotGenerated(_)));
    }

    #[test]
    fn test_templates_for_workflows() {
        let store = MemoryStore::new();
        let mut registry = TemplateRegistry::new();
        registry.register(template());
        let req = ExecutionRequest::new("api").with_param("env", "prod");
        generate(&TemplateExecutor::default(), &store, &template(), &req).unwrap();

        let found =
            templates_for_workflows(&store, &registry, &["api".to_string(), "manual".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["api"].id, "svc");
    }

    #[test]
    fn test_deleting_workflow_drops_instance() {
        let store = MemoryStore::new();
        let req = ExecutionRequest::new("api").with_param("env", "prod");
        generate(&TemplateExecutor::default(), &store, &template(), &req).unwrap();
        assert!(store.delete_workflow("api").unwrap());
        assert!(store.instance("api").unwrap().is_none());
    }
}
