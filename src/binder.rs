//! Parameter Binder - request values to render scope

use serde_json::{Map, Value};

use crate::templates::{ExecutionRequest, ParameterType, Template};

pub const SCOPE_ID: &str = "id";
pub const SCOPE_NAME: &str = "name";
pub const SCOPE_PARAMS: &str = "params";

/// Binds declared parameters present in the request.
///
/// Booleans are `true` only for the exact string `"true"`. Every other type
/// keeps the raw string. Undeclared request keys are ignored and declared keys
/// missing from the request are left out of the result.
pub fn bind_params(template: &Template, request: &ExecutionRequest) -> Map<String, Value> {
    let mut params = Map::new();
    for spec in &template.parameters {
        if let Some(raw) = request.parameters.get(&spec.key) {
            let value = match spec.kind {
                ParameterType::Boolean => Value::Bool(raw == "true"),
                _ => Value::String(raw.clone()),
            };
            params.insert(spec.key.clone(), value);
        }
    }
    params
}

/// Full render scope: `{ id, name, params }`.
pub fn build_scope(template: &Template, request: &ExecutionRequest) -> Value {
    let mut scope = Map::new();
    scope.insert(SCOPE_ID.to_string(), Value::String(template.id.clone()));
    scope.insert(SCOPE_NAME.to_string(), Value::String(request.name.clone()));
    scope.insert(
        SCOPE_PARAMS.to_string(),
        Value::Object(bind_params(template, request)),
    );
    Value::Object(scope)
}
