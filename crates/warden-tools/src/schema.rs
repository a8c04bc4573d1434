//! First-class input/output schemas.
//!
//! Schemas are plain values with two consumers: [`Schema::validate`] checks
//! an input and returns it with defaults applied (or a list of violations),
//! and [`Schema::to_json_schema`] renders the JSON Schema shape shown to
//! language models in tool catalogues.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A schema node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Field>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        items: Box<Schema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Enum {
        variants: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// One named property of an object schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub schema: Schema,
    /// Optional fields may be absent; required fields produce a violation.
    #[serde(default)]
    pub optional: bool,
    /// Filled in when the field is absent (implies optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Schema {
    /// An object schema with no properties yet. Chain [`Schema::required`]
    /// and [`Schema::optional`] to add fields.
    pub fn object() -> Self {
        Schema::Object {
            properties: BTreeMap::new(),
        }
    }

    pub fn string(description: &str) -> Self {
        Schema::String {
            description: Some(description.to_string()),
        }
    }

    pub fn integer(description: &str) -> Self {
        Schema::Integer {
            description: Some(description.to_string()),
        }
    }

    pub fn number(description: &str) -> Self {
        Schema::Number {
            description: Some(description.to_string()),
        }
    }

    pub fn boolean(description: &str) -> Self {
        Schema::Boolean {
            description: Some(description.to_string()),
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            description: None,
        }
    }

    pub fn enumeration(variants: &[&str]) -> Self {
        Schema::Enum {
            variants: variants.iter().map(|v| v.to_string()).collect(),
            description: None,
        }
    }

    /// Add a required field (panics if not an object schema).
    #[must_use]
    pub fn required(mut self, name: &str, field_schema: Schema) -> Self {
        match &mut self {
            Schema::Object { properties } => {
                properties.insert(
                    name.to_string(),
                    Field {
                        schema: field_schema,
                        optional: false,
                        default: None,
                    },
                );
            }
            _ => panic!("required() called on non-object schema"),
        }
        self
    }

    /// Add an optional field with an optional default (panics if not an
    /// object schema).
    #[must_use]
    pub fn optional(mut self, name: &str, field_schema: Schema, default: Option<Value>) -> Self {
        match &mut self {
            Schema::Object { properties } => {
                properties.insert(
                    name.to_string(),
                    Field {
                        schema: field_schema,
                        optional: true,
                        default,
                    },
                );
            }
            _ => panic!("optional() called on non-object schema"),
        }
        self
    }

    /// Validate `input` against this schema.
    ///
    /// On success returns the value with defaults filled in for absent
    /// optional fields. On failure returns every violation found, phrased
    /// for humans (`missing required field: path`).
    pub fn validate(&self, input: &Value) -> Result<Value, Vec<String>> {
        let mut violations = Vec::new();
        let coerced = self.validate_at("", input, &mut violations);
        if violations.is_empty() {
            Ok(coerced)
        } else {
            Err(violations)
        }
    }

    fn validate_at(&self, path: &str, input: &Value, violations: &mut Vec<String>) -> Value {
        let label = |field: &str| {
            if path.is_empty() {
                field.to_string()
            } else {
                format!("{path}.{field}")
            }
        };
        let here = if path.is_empty() { "input" } else { path };

        match self {
            Schema::Object { properties } => {
                let Some(map) = input.as_object() else {
                    violations.push(format!("{here} must be an object"));
                    return input.clone();
                };
                let mut out = serde_json::Map::new();
                for (name, field) in properties {
                    match map.get(name) {
                        Some(value) => {
                            let coerced = field.schema.validate_at(&label(name), value, violations);
                            out.insert(name.clone(), coerced);
                        }
                        None => {
                            if let Some(default) = &field.default {
                                out.insert(name.clone(), default.clone());
                            } else if !field.optional {
                                violations.push(format!(
                                    "missing required field: {}",
                                    label(name)
                                ));
                            }
                        }
                    }
                }
                // Unknown fields pass through untouched; tools ignore them.
                for (name, value) in map {
                    if !properties.contains_key(name) {
                        out.insert(name.clone(), value.clone());
                    }
                }
                Value::Object(out)
            }
            Schema::String { .. } => {
                if !input.is_string() {
                    violations.push(format!("{here} must be a string"));
                }
                input.clone()
            }
            Schema::Integer { .. } => {
                if !input.is_i64() && !input.is_u64() {
                    violations.push(format!("{here} must be an integer"));
                }
                input.clone()
            }
            Schema::Number { .. } => {
                if !input.is_number() {
                    violations.push(format!("{here} must be a number"));
                }
                input.clone()
            }
            Schema::Boolean { .. } => {
                if !input.is_boolean() {
                    violations.push(format!("{here} must be a boolean"));
                }
                input.clone()
            }
            Schema::Array { items, .. } => {
                let Some(values) = input.as_array() else {
                    violations.push(format!("{here} must be an array"));
                    return input.clone();
                };
                let coerced = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| items.validate_at(&format!("{here}[{i}]"), v, violations))
                    .collect();
                Value::Array(coerced)
            }
            Schema::Enum { variants, .. } => {
                match input.as_str() {
                    Some(s) if variants.iter().any(|v| v == s) => {}
                    Some(s) => violations.push(format!(
                        "{here} must be one of [{}], got: {s}",
                        variants.join(", ")
                    )),
                    None => violations.push(format!("{here} must be a string enum value")),
                }
                input.clone()
            }
        }
    }

    /// Render the JSON Schema shape exposed to language models.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Schema::Object { properties } => {
                let mut props = serde_json::Map::new();
                let mut required = Vec::new();
                for (name, field) in properties {
                    props.insert(name.clone(), field.schema.to_json_schema());
                    if !field.optional && field.default.is_none() {
                        required.push(Value::String(name.clone()));
                    }
                }
                json!({
                    "type": "object",
                    "properties": Value::Object(props),
                    "required": Value::Array(required),
                })
            }
            Schema::String { description } => with_description("string", description),
            Schema::Integer { description } => with_description("integer", description),
            Schema::Number { description } => with_description("number", description),
            Schema::Boolean { description } => with_description("boolean", description),
            Schema::Array { items, description } => {
                let mut schema = json!({
                    "type": "array",
                    "items": items.to_json_schema(),
                });
                if let Some(d) = description {
                    schema["description"] = Value::String(d.clone());
                }
                schema
            }
            Schema::Enum {
                variants,
                description,
            } => {
                let mut schema = json!({
                    "type": "string",
                    "enum": variants,
                });
                if let Some(d) = description {
                    schema["description"] = Value::String(d.clone());
                }
                schema
            }
        }
    }
}

fn with_description(type_name: &str, description: &Option<String>) -> Value {
    let mut schema = json!({ "type": type_name });
    if let Some(d) = description {
        schema["description"] = Value::String(d.clone());
    }
    schema
}
