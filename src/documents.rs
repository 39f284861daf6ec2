//! Generated Documents - rendered text to structured YAML
//!
//! Only the `name` key is interpreted; everything else is carried through in
//! document order.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::error::{ArtifactRef, EngineError};
use crate::execute::ExecutionResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub name: String,
    #[serde(flatten)]
    pub body: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: String,
    #[serde(flatten)]
    pub body: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDocument {
    pub name: String,
    #[serde(flatten)]
    pub body: Mapping,
}

/// Every document of one execution, parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArtifacts {
    pub workflow: WorkflowDocument,
    pub pipelines: Vec<PipelineDocument>,
    pub applications: Vec<ApplicationDocument>,
}

fn parse<D: DeserializeOwned>(template: &str, artifact: ArtifactRef, text: &str) -> Result<D, EngineError> {
    serde_yaml::from_str(text).map_err(|source| EngineError::DocumentParse {
        template: template.to_string(),
        artifact,
        source,
    })
}

fn require_name(template: &str, artifact: ArtifactRef, name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidDocument {
            template: template.to_string(),
            artifact,
            reason: "name is empty".to_string(),
        });
    }
    Ok(())
}

/// Parses all rendered documents; the first malformed one fails the whole set.
pub fn parse_result(template: &str, result: &ExecutionResult) -> Result<ParsedArtifacts, EngineError> {
    let workflow: WorkflowDocument = parse(template, ArtifactRef::Workflow, &result.workflow)?;
    require_name(template, ArtifactRef::Workflow, &workflow.name)?;
    let pipelines = result
        .pipelines
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let doc: PipelineDocument = parse(template, ArtifactRef::Pipeline(i), text)?;
            require_name(template, ArtifactRef::Pipeline(i), &doc.name)?;
            Ok(doc)
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    let applications = result
        .applications
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let doc: ApplicationDocument = parse(template, ArtifactRef::Application(i), text)?;
            require_name(template, ArtifactRef::Application(i), &doc.name)?;
            Ok(doc)
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    Ok(ParsedArtifacts {
        workflow,
        pipelines,
        applications,
    })
}

pub fn to_yaml<D: Serialize>(artifact: ArtifactRef, name: &str, doc: &D) -> Result<String, EngineError> {
    serde_yaml::to_string(doc).map_err(|source| EngineError::Serialize {
        artifact,
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_parse_keeps_body_order() {
        let result = ExecutionResult {
            workflow: "name: wf\nworkflow:\n  build:\n    pipeline: build\nversion: v1.0\n".into(),
            pipelines: vec!["name: build\nstages: [compile]\n".into()],
            applications: vec![],
        };
        let parsed = parse_result("tpl", &result).unwrap();
        assert_eq!(parsed.workflow.name, "wf");
        let keys: Vec<_> = parsed.workflow.body.iter().filter_map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["workflow", "version"]);
        assert_eq!(parsed.pipelines[0].name, "build");

        let yaml = to_yaml(ArtifactRef::Workflow, "wf", &parsed.workflow).unwrap();
        assert!(yaml.starts_with("name: wf\n"));
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let result = ExecutionResult {
            workflow: "name: wf".into(),
            pipelines: vec!["name: ok".into(), "stages: []".into()],
            applications: vec![],
        };
        let err = parse_result("tpl", &result).unwrap_err();
        assert!(matches!(err, EngineError::DocumentParse { artifact: ArtifactRef::Pipeline(1), .. }));
    }

    #[test]
    fn test_empty_name_is_bad_request() {
        let result = ExecutionResult {
            workflow: "name: \"\"\nworkflow: {}\n".into(),
            ..Default::default()
        };
        let err = parse_result("tpl", &result).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDocument { artifact: ArtifactRef::Workflow, .. }));
        assert_eq!(err.class(), ErrorClass::BadRequest);
    }

    #[test]
    fn test_non_mapping_is_parse_error() {
        let result = ExecutionResult {
            workflow: "- just\n- a list".into(),
            ..Default::default()
        };
        assert!(parse_result("tpl", &result).is_err());
    }
}
