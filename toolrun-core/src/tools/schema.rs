//! Parameter validation against a tool's JSON Schema

use super::result::ValidationError;
use jsonschema::JSONSchema;
use serde_json::Value;

/// Validate `params` against a JSON Schema document.
///
/// An uncompilable schema is reported as a validation failure on the root so
/// that a misconfigured tool fails as a caller/config error instead of being
/// invoked with unchecked input.
pub fn validate_params(schema: &Value, params: &Value) -> Result<(), Vec<ValidationError>> {
    let compiled = JSONSchema::compile(schema).map_err(|e| {
        vec![ValidationError::new("/", format!("invalid parameter schema: {}", e))
            .with_code("INVALID_SCHEMA")]
    })?;

    let errors: Vec<ValidationError> = match compiled.validate(params) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| {
                let path = e.instance_path.to_string();
                let field = if path.is_empty() { "/".to_string() } else { path };
                ValidationError::new(field, e.to_string())
            })
            .collect(),
    };

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
