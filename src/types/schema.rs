//! Tool and parameter schemas.
//!
//! A deliberately small subset of JSON Schema: primitive types, `enum`,
//! numeric bounds, string length/pattern, and recursive `object`/`array`.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
            ParameterType::Null => "null",
        }
    }

    /// The schema type name that best describes a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ParameterType::String,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ParameterType::Integer
                } else {
                    ParameterType::Number
                }
            }
            Value::Bool(_) => ParameterType::Boolean,
            Value::Array(_) => ParameterType::Array,
            Value::Object(_) => ParameterType::Object,
            Value::Null => ParameterType::Null,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared contract of a single parameter (recursive for objects and arrays).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ParameterSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl ParameterSchema {
    pub fn of_type(kind: ParameterType) -> Self {
        Self {
            kind,
            description: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: None,
            items: None,
            min_items: None,
            max_items: None,
        }
    }

    pub fn string() -> Self {
        Self::of_type(ParameterType::String)
    }

    pub fn number() -> Self {
        Self::of_type(ParameterType::Number)
    }

    pub fn integer() -> Self {
        Self::of_type(ParameterType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of_type(ParameterType::Boolean)
    }

    pub fn object() -> Self {
        Self::of_type(ParameterType::Object)
    }

    pub fn array(items: ParameterSchema) -> Self {
        let mut s = Self::of_type(ParameterType::Array);
        s.items = Some(Box::new(items));
        s
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.description = Some(d.into());
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.minimum = min;
        self.maximum = max;
        self
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: ParameterSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn with_additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = Some(allowed);
        self
    }
}

/// Declared contract of a tool: name, description and an object-typed
/// parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema::object(),
        }
    }

    /// Add a parameter; `required` marks it mandatory.
    pub fn with_param(mut self, name: impl Into<String>, schema: ParameterSchema, required: bool) -> Self {
        let name = name.into();
        if required {
            self.parameters.required.push(name.clone());
        }
        self.parameters.properties.insert(name, schema);
        self
    }

    /// Structural checks performed before a schema enters a registry.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "tool name must not be empty",
                ErrorContext::new().with_source("tool_schema"),
            ));
        }
        if self.parameters.kind != ParameterType::Object {
            return Err(Error::configuration_with_context(
                format!("parameters of tool '{}' must be an object schema", self.name),
                ErrorContext::new()
                    .with_field_path(format!("{}.parameters.type", self.name))
                    .with_source("tool_schema"),
            ));
        }
        for req in &self.parameters.required {
            if !self.parameters.properties.contains_key(req) {
                return Err(Error::configuration_with_context(
                    format!("required parameter '{}' is not declared", req),
                    ErrorContext::new()
                        .with_field_path(format!("{}.parameters.required", self.name))
                        .with_source("tool_schema"),
                ));
            }
        }
        Ok(())
    }

    /// Load a list of schemas from a JSON array.
    pub fn list_from_json(content: &str) -> Result<Vec<ToolSchema>> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a list of schemas from a YAML sequence.
    pub fn list_from_yaml(content: &str) -> Result<Vec<ToolSchema>> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                "invalid tool schema catalog",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("tool_schema"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_json_schema_subset() {
        let raw = json!({
            "name": "create_dataset",
            "description": "Create a dataset",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "minLength": 1, "pattern": "^[A-Za-z]"},
                    "attributes": {
                        "type": "array",
                        "items": {"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]},
                        "maxItems": 50
                    }
                },
                "required": ["name"]
            }
        });
        let schema: ToolSchema = serde_json::from_value(raw).unwrap();
        assert!(schema.check().is_ok());
        let attrs = &schema.parameters.properties["attributes"];
        assert_eq!(attrs.kind, ParameterType::Array);
        assert_eq!(attrs.max_items, Some(50));
        assert_eq!(attrs.items.as_ref().unwrap().required, vec!["name".to_string()]);
    }

    #[test]
    fn check_rejects_undeclared_required() {
        let mut schema = ToolSchema::new("t", "");
        schema.parameters.required.push("ghost".into());
        assert!(schema.check().is_err());
    }

    #[test]
    fn check_rejects_non_object_parameters() {
        let mut schema = ToolSchema::new("t", "");
        schema.parameters = ParameterSchema::string();
        assert!(schema.check().is_err());
    }

    #[test]
    fn loads_yaml_catalog() {
        let yaml = r#"
- name: echo
  description: Echo text back
  parameters:
    type: object
    properties:
      text:
        type: string
    required: [text]
- name: ping
  parameters:
    type: object
"#;
        let list = ToolSchema::list_from_yaml(yaml).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].parameters.required, vec!["text".to_string()]);
        assert_eq!(list[1].description, "");
    }

    #[test]
    fn type_of_value() {
        assert_eq!(ParameterType::of(&json!(1)), ParameterType::Integer);
        assert_eq!(ParameterType::of(&json!(1.5)), ParameterType::Number);
        assert_eq!(ParameterType::of(&json!(null)), ParameterType::Null);
    }
}
