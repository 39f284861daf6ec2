//! Template Execution - all artifacts or nothing
//!
//! The workflow body renders first, then pipelines and applications in
//! template order. The first failure aborts; no partial result escapes.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binder::build_scope;
use crate::error::{ArtifactRef, EngineError};
use crate::render::{RenderError, Renderer};
use crate::templates::{ExecutionRequest, Template};

/// Rendered text for every artifact of a template, index-aligned with the
/// template's pipeline and application lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub workflow: String,
    pub pipelines: Vec<String>,
    pub applications: Vec<String>,
}

impl ExecutionResult {
    pub fn artifact_count(&self) -> usize {
        1 + self.pipelines.len() + self.applications.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateExecutor {
    renderer: Renderer,
}

impl TemplateExecutor {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn execute(
        &self,
        template: &Template,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, EngineError> {
        info!(
            template = %template.id,
            version = template.version,
            target = %request.name,
            "executing template"
        );
        let scope = build_scope(template, request);

        let workflow = self.render_artifact(template, ArtifactRef::Workflow, &template.value, &scope)?;

        let mut pipelines = Vec::with_capacity(template.pipelines.len());
        for (i, body) in template.pipelines.iter().enumerate() {
            pipelines.push(self.render_artifact(template, ArtifactRef::Pipeline(i), &body.value, &scope)?);
        }

        let mut applications = Vec::with_capacity(template.applications.len());
        for (i, body) in template.applications.iter().enumerate() {
            applications.push(self.render_artifact(
                template,
                ArtifactRef::Application(i),
                &body.value,
                &scope,
            )?);
        }

        Ok(ExecutionResult {
            workflow,
            pipelines,
            applications,
        })
    }

    fn render_artifact(
        &self,
        template: &Template,
        artifact: ArtifactRef,
        encoded: &str,
        scope: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let out = self
            .renderer
            .render_encoded(encoded, scope)
            .map_err(|e| contextualize(template, artifact, e))?;
        debug!(template = %template.id, %artifact, bytes = out.len(), "rendered artifact");
        Ok(out)
    }
}

fn contextualize(template: &Template, artifact: ArtifactRef, err: RenderError) -> EngineError {
    let template = template.id.clone();
    match err {
        RenderError::Decode(reason) => EngineError::MalformedTemplate {
            template,
            artifact,
            reason,
        },
        RenderError::Syntax { offset, message } => EngineError::TemplateSyntax {
            template,
            artifact,
            offset,
            message,
        },
        RenderError::Execution(message) => EngineError::Render {
            template,
            artifact,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::templates::EncodedBody;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn template(pipelines: &[&str]) -> Template {
        Template {
            id: "tpl".into(),
            group_id: "g".into(),
            name: "tpl".into(),
            description: String::new(),
            version: 1,
            parameters: vec![],
            value: STANDARD.encode("name: [[.name]]"),
            pipelines: pipelines.iter().map(|p| EncodedBody::encode(p)).collect(),
            applications: vec![EncodedBody::encode("name: [[.name]]-app")],
        }
    }

    #[test]
    fn test_results_are_index_aligned() {
        let t = template(&["name: [[.name]]-build", "name: [[.name]]-deploy"]);
        let res = TemplateExecutor::default()
            .execute(&t, &ExecutionRequest::new("api"))
            .unwrap();
        assert_eq!(res.workflow, "name: api");
        assert_eq!(res.pipelines, vec!["name: api-build", "name: api-deploy"]);
        assert_eq!(res.applications, vec!["name: api-app"]);
        assert_eq!(res.artifact_count(), 4);
    }

    #[test]
    fn test_failure_names_the_artifact() {
        let t = template(&["name: ok", "name: [[.params.nope]]"]);
        let err = TemplateExecutor::default()
            .execute(&t, &ExecutionRequest::new("api"))
            .unwrap_err();
        match &err {
            EngineError::Render { artifact, .. } => assert_eq!(*artifact, ArtifactRef::Pipeline(1)),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.class(), ErrorClass::BadRequest);
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let mut t = template(&[]);
        t.value = "%%%".into();
        let err = TemplateExecutor::default().execute(&t, &ExecutionRequest::new("a")).unwrap_err();
        assert_eq!(err.class(), ErrorClass::DataIntegrity);

        let mut t = template(&[]);
        t.applications = vec![EncodedBody::encode("[[if .name]]")];
        let err = TemplateExecutor::default().execute(&t, &ExecutionRequest::new("a")).unwrap_err();
        assert!(matches!(err, EngineError::TemplateSyntax { artifact: ArtifactRef::Application(0), .. }));
        assert_eq!(err.class(), ErrorClass::TemplateOwner);
    }
}
