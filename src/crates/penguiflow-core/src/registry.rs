//! Node name → (input schema, output schema) lookup used for validation.
//!
//! A [`Validator`] is the typed-systems stand-in for the source's
//! runtime-introspected type objects (see SPEC_FULL.md §9): it accepts a
//! candidate value and either normalizes it or raises a structured
//! [`ValidationError`]. [`Registry`] maps node names to a pair of
//! validators; a node whose name is absent from the registry is treated as
//! "no schema, skip validation" rather than an error, per §4.7.

use crate::error::ValidationError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One side (input or output) of a node's schema contract.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError>;
}

/// Passthrough validator for nodes with no declared schema.
pub struct AlwaysValid;

impl Validator for AlwaysValid {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        Ok(value.clone())
    }
}

/// JSON Schema-backed validator, available behind the `json-validation`
/// feature (mirrors the teacher's own `json-validation` Cargo feature).
#[cfg(feature = "json-validation")]
pub struct JsonSchemaValidator {
    schema: jsonschema::JSONSchema,
}

#[cfg(feature = "json-validation")]
impl JsonSchemaValidator {
    pub fn compile(schema: &Value) -> Result<Self, ValidationError> {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| ValidationError::new(format!("invalid schema: {e}")))?;
        Ok(Self { schema: compiled })
    }
}

#[cfg(feature = "json-validation")]
impl Validator for JsonSchemaValidator {
    fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        let result = self.schema.validate(value);
        if let Err(errors) = result {
            let first = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ValidationError::new(first));
        }
        Ok(value.clone())
    }
}

/// The pair of validators registered for one node.
#[derive(Clone)]
pub struct NodeSchemas {
    pub input: Arc<dyn Validator>,
    pub output: Arc<dyn Validator>,
}

/// Maps node name → its registered input/output validators.
#[derive(Clone, Default)]
pub struct Registry {
    schemas: HashMap<String, NodeSchemas>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        node_name: impl Into<String>,
        input: Arc<dyn Validator>,
        output: Arc<dyn Validator>,
    ) -> &mut Self {
        self.schemas
            .insert(node_name.into(), NodeSchemas { input, output });
        self
    }

    pub fn get(&self, node_name: &str) -> Option<&NodeSchemas> {
        self.schemas.get(node_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_node_has_no_schema() {
        let registry = Registry::new();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn always_valid_passes_anything() {
        let v = AlwaysValid;
        assert!(v.validate(&Value::Null).is_ok());
    }
}
