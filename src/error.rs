//! Engine Errors - One Enum, Distinguishable Kinds
//!
//! Every variant names the template and, where it applies, the artifact.
//! Callers branch on `class()`, never on message text.

use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Which generated artifact an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRef {
    Workflow,
    Pipeline(usize),
    Application(usize),
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::Workflow => write!(f, "workflow"),
            ArtifactRef::Pipeline(i) => write!(f, "pipeline[{}]", i),
            ArtifactRef::Application(i) => write!(f, "application[{}]", i),
        }
    }
}

/// Coarse error classes used to pick a response for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stored template data is corrupt.
    DataIntegrity,
    /// The template body itself is wrong; report to its owner.
    TemplateOwner,
    /// The request (or what it renders to) is wrong.
    BadRequest,
    /// Lost a race against a concurrent writer. Retryable.
    Conflict,
    Server,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Malformed stored template {template} ({artifact}): {reason}")]
    MalformedTemplate {
        template: String,
        artifact: ArtifactRef,
        reason: String,
    },

    #[error("Template syntax error in {template} ({artifact}) at offset {offset}: {message}")]
    TemplateSyntax {
        template: String,
        artifact: ArtifactRef,
        offset: usize,
        message: String,
    },

    #[error("Render error in {template} ({artifact}): {message}")]
    Render {
        template: String,
        artifact: ArtifactRef,
        message: String,
    },

    #[error("Cannot parse generated {artifact} of template {template}: {source}")]
    DocumentParse {
        template: String,
        artifact: ArtifactRef,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Generated {artifact} of template {template} is invalid: {reason}")]
    InvalidDocument {
        template: String,
        artifact: ArtifactRef,
        reason: String,
    },

    #[error("Cannot serialize {artifact} '{name}': {source}")]
    Serialize {
        artifact: ArtifactRef,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Workflow {0} was not generated from a template")]
    WorkflowNotGenerated(String),

    #[error("Workflow {workflow} is already at template version {version}")]
    AlreadyLatestTemplate { workflow: String, version: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::MalformedTemplate { .. } => ErrorClass::DataIntegrity,
            EngineError::TemplateSyntax { .. } => ErrorClass::TemplateOwner,
            EngineError::Render { .. }
            | EngineError::DocumentParse { .. }
            | EngineError::InvalidDocument { .. }
            | EngineError::InvalidParameters(_)
            | EngineError::TemplateNotFound(_)
            | EngineError::WorkflowNotGenerated(_)
            | EngineError::AlreadyLatestTemplate { .. } => ErrorClass::BadRequest,
            EngineError::Store(StoreError::Conflict { .. }) => ErrorClass::Conflict,
            EngineError::Store(_)
            | EngineError::Serialize { .. }
            | EngineError::Archive(_)
            | EngineError::Config(_) => ErrorClass::Server,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_ref_display() {
        assert_eq!(ArtifactRef::Workflow.to_string(), "workflow");
        assert_eq!(ArtifactRef::Pipeline(2).to_string(), "pipeline[2]");
        assert_eq!(ArtifactRef::Application(0).to_string(), "application[0]");
    }

    #[test]
    fn test_classes_are_distinct() {
        let malformed = EngineError::MalformedTemplate {
            template: "t".into(),
            artifact: ArtifactRef::Workflow,
            reason: "bad base64".into(),
        };
        let render = EngineError::Render {
            template: "t".into(),
            artifact: ArtifactRef::Pipeline(1),
            message: "missing".into(),
        };
        let conflict = EngineError::Store(StoreError::Conflict {
            workflow: "wf".into(),
        });

        assert_eq!(malformed.class(), ErrorClass::DataIntegrity);
        assert_eq!(render.class(), ErrorClass::BadRequest);
        let unnamed = EngineError::InvalidDocument {
            template: "t".into(),
            artifact: ArtifactRef::Workflow,
            reason: "name is empty".into(),
        };

        assert_eq!(unnamed.class(), ErrorClass::BadRequest);
        assert!(conflict.is_retryable());
        assert!(!render.is_retryable());
    }
}
