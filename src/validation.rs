//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations. Only `Error` violations block.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ArtifactRef, EngineError};
use crate::render::{decode_body, RenderError, Renderer};
use crate::templates::{ExecutionRequest, Template};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    fn error(rule: &str, message: String, remediation: &str) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Error,
            message,
            remediation: vec![remediation.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub template_id: String,
    pub template_version: u64,
}

impl ValidationResult {
    fn from_violations(template: &Template, violations: Vec<ValidationViolation>) -> Self {
        Self {
            valid: !violations.iter().any(|v| v.severity == ViolationSeverity::Error),
            violations,
            template_id: template.id.clone(),
            template_version: template.version,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    fn error_summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, template: &Template) -> Vec<ValidationViolation>;
}

// --- Template rules ---

pub struct IdentityRule;

impl ValidationRule for IdentityRule {
    fn name(&self) -> &'static str { "identity" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        if template.name.trim().is_empty() {
            violations.push(ValidationViolation::error(self.name(), "Template name is empty".into(), "Set a name"));
        }
        if template.group_id.trim().is_empty() {
            violations.push(ValidationViolation::error(
                self.name(),
                "Template has no owning group".into(),
                "Set groupId",
            ));
        }
        violations
    }
}

pub struct ParameterKeysRule;

impl ValidationRule for ParameterKeysRule {
    fn name(&self) -> &'static str { "parameter_keys" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        let mut seen = HashSet::new();
        let mut violations = vec![];
        for spec in &template.parameters {
            let usable = !spec.key.is_empty()
                && spec.key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if !usable {
                violations.push(ValidationViolation::error(
                    self.name(),
                    format!("Parameter key {:?} cannot be referenced", spec.key),
                    "Use letters, digits, '_' or '-'",
                ));
            }
            if !seen.insert(spec.key.as_str()) {
                violations.push(ValidationViolation::error(
                    self.name(),
                    format!("Parameter key {:?} is declared twice", spec.key),
                    "Remove the duplicate declaration",
                ));
            }
        }
        violations
    }
}

/// Every body must decode and parse.
pub struct BodySyntaxRule {
    renderer: Renderer,
}

impl BodySyntaxRule {
    pub fn new(renderer: Renderer) -> Self {
        Self { renderer }
    }
}

impl ValidationRule for BodySyntaxRule {
    fn name(&self) -> &'static str { "body_syntax" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        bodies(template)
            .filter_map(|(artifact, encoded)| {
                let err = match decode_body(encoded) {
                    Ok(body) => self.renderer.compile(&body).err()?,
                    Err(e) => e,
                };
                let remediation = match err {
                    RenderError::Decode(_) => "Store the body base64 encoded",
                    _ => "Fix the template body",
                };
                Some(ValidationViolation::error(self.name(), format!("{}: {}", artifact, err), remediation))
            })
            .collect()
    }
}

fn bodies(template: &Template) -> impl Iterator<Item = (ArtifactRef, &str)> {
    std::iter::once((ArtifactRef::Workflow, template.value.as_str()))
        .chain(
            template
                .pipelines
                .iter()
                .enumerate()
                .map(|(i, b)| (ArtifactRef::Pipeline(i), b.value.as_str())),
        )
        .chain(
            template
                .applications
                .iter()
                .enumerate()
                .map(|(i, b)| (ArtifactRef::Application(i), b.value.as_str())),
        )
}

// --- Request checks ---

/// Required parameters must be present; undeclared keys are reported and ignored.
pub fn request_violations(template: &Template, request: &ExecutionRequest) -> Vec<ValidationViolation> {
    let mut violations = vec![];
    if request.name.trim().is_empty() {
        violations.push(ValidationViolation::error(
            "request_name",
            "Request has no target name".into(),
            "Set name",
        ));
    }
    for spec in template.parameters.iter().filter(|p| p.required) {
        if !request.parameters.contains_key(&spec.key) {
            violations.push(ValidationViolation::error(
                "required_parameter",
                format!("Missing required parameter {}", spec.key),
                "Provide a value for every required parameter",
            ));
        }
    }
    for key in request.parameters.keys() {
        if template.parameter(key).is_none() {
            violations.push(ValidationViolation {
                rule: "unknown_parameter".to_string(),
                severity: ViolationSeverity::Info,
                message: format!("Parameter {} is not declared and will be ignored", key),
                remediation: vec![],
            });
        }
    }
    violations
}

/// Gate run before executing a request.
pub fn check_params(template: &Template, request: &ExecutionRequest) -> Result<(), EngineError> {
    let result = ValidationResult::from_violations(template, request_violations(template, request));
    if result.has_errors() {
        return Err(EngineError::InvalidParameters(result.error_summary()));
    }
    Ok(())
}

/// Validator orchestrates rules
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            rules: vec![
                Box::new(IdentityRule),
                Box::new(ParameterKeysRule),
                Box::new(BodySyntaxRule::new(renderer)),
            ],
        }
    }

    pub fn validate_template(&self, template: &Template) -> ValidationResult {
        let violations = self.rules.iter().flat_map(|r| r.validate(template)).collect();
        ValidationResult::from_violations(template, violations)
    }

    /// Template rules plus request checks.
    pub fn validate_request(&self, template: &Template, request: &ExecutionRequest) -> ValidationResult {
        let mut result = self.validate_template(template);
        result.violations.extend(request_violations(template, request));
        result.valid = !result.has_errors();
        result
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Renderer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{EncodedBody, ParameterSpec, ParameterType};

    fn template() -> Template {
        Template {
            id: "t".into(),
            group_id: "g".into(),
            name: "t".into(),
            description: String::new(),
            version: 2,
            parameters: vec![
                ParameterSpec { key: "env".into(), kind: ParameterType::String, required: true },
                ParameterSpec { key: "debug".into(), kind: ParameterType::Boolean, required: false },
            ],
            value: EncodedBody::encode("name: [[.name]]").value,
            pipelines: vec![EncodedBody::encode("name: p")],
            applications: vec![],
        }
    }

    #[test]
    fn test_valid_template() {
        let result = Validator::default().validate_template(&template());
        assert!(result.valid, "{:?}", result.violations);
        assert_eq!(result.template_version, 2);
    }

    #[test]
    fn test_duplicate_and_bad_keys() {
        let mut t = template();
        t.parameters.push(ParameterSpec { key: "env".into(), kind: ParameterType::String, required: false });
        t.parameters.push(ParameterSpec { key: "a.b".into(), kind: ParameterType::String, required: false });
        let result = Validator::default().validate_template(&t);
        assert!(!result.valid);
        assert_eq!(result.violations.iter().filter(|v| v.rule == "parameter_keys").count(), 2);
    }

    #[test]
    fn test_broken_bodies_reported_per_artifact() {
        let mut t = template();
        t.pipelines.push(EncodedBody { value: "not base64!".into() });
        t.applications.push(EncodedBody::encode("[[if .name]]"));
        let result = Validator::default().validate_template(&t);
        let messages: Vec<_> = result.violations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("pipeline[1]"));
        assert!(messages[1].starts_with("application[0]"));
    }

    #[test]
    fn test_check_params() {
        let t = template();
        assert!(check_params(&t, &ExecutionRequest::new("x").with_param("env", "prod")).is_ok());

        let err = check_params(&t, &ExecutionRequest::new("x").with_param("debug", "true")).unwrap_err();
        assert!(err.to_string().contains("Missing required parameter env"));
    }

    #[test]
    fn test_unknown_params_do_not_block() {
        let req = ExecutionRequest::new("x").with_param("env", "p").with_param("extra", "1");
        let result = Validator::default().validate_request(&template(), &req);
        assert!(result.valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Info);
    }
}
