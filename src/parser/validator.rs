//! Parameter validator.
//!
//! Checks tool arguments against a [`ParameterSchema`]:
//! - type (string, integer, number, boolean, array, object, null)
//! - required-ness, with `null` treated as absent for optional parameters
//! - `enum` membership
//! - numeric bounds (`minimum`, `maximum`, inclusive)
//! - string length (in characters) and `pattern`
//! - array item count and item schema
//! - nested objects, including `additionalProperties: false`
//!
//! Validation stops at the first violation.

use crate::types::{ParameterSchema, ParameterType};
use lru::LruCache;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// First constraint a value failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamViolation {
    /// Path to the offending value (e.g., "attributes[2].name")
    pub path: String,
    /// Name of the failed constraint (e.g., "type", "required", "maximum")
    pub constraint: &'static str,
    pub message: String,
}

impl ParamViolation {
    fn new(path: &str, constraint: &'static str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            constraint,
            message: message.into(),
        }
    }

    pub fn to_details(&self) -> Value {
        json!({
            "path": self.path,
            "constraint": self.constraint,
            "message": self.message,
        })
    }
}

/// Compiled `pattern` regexes, keyed by source.
pub(crate) struct PatternCache {
    cache: Mutex<LruCache<String, Option<Regex>>>,
}

impl PatternCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// `None` when the pattern does not compile.
    fn get(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(pattern) {
            return hit.clone();
        }
        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "ignoring invalid parameter pattern");
                None
            }
        };
        cache.put(pattern.to_string(), compiled.clone());
        compiled
    }
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

/// Deepest object/array nesting in `value` (a scalar is 0, `{}` is 1),
/// stopping early once `limit` is exceeded.
pub(crate) fn nesting_depth(value: &Value, limit: usize) -> usize {
    let mut max = 0;
    let mut stack: Vec<(&Value, usize)> = vec![(value, 0)];
    while let Some((v, depth)) = stack.pop() {
        let children: Box<dyn Iterator<Item = &Value>> = match v {
            Value::Object(m) => Box::new(m.values()),
            Value::Array(a) => Box::new(a.iter()),
            _ => continue,
        };
        let here = depth + 1;
        max = max.max(here);
        if max > limit {
            return max;
        }
        stack.extend(children.map(|c| (c, here)));
    }
    max
}

pub(crate) struct ParameterValidator<'a> {
    patterns: &'a PatternCache,
}

impl<'a> ParameterValidator<'a> {
    pub(crate) fn new(patterns: &'a PatternCache) -> Self {
        Self { patterns }
    }

    /// Validate a tool's argument object against its (object-typed) schema.
    pub(crate) fn validate_args(
        &self,
        schema: &ParameterSchema,
        args: &Map<String, Value>,
    ) -> Result<(), ParamViolation> {
        self.validate_object(schema, args, "")
    }

    fn validate_object(
        &self,
        schema: &ParameterSchema,
        obj: &Map<String, Value>,
        path: &str,
    ) -> Result<(), ParamViolation> {
        for name in &schema.required {
            match obj.get(name) {
                None | Some(Value::Null) => {
                    return Err(ParamViolation::new(
                        &join_path(path, name),
                        "required",
                        format!("Missing required parameter '{}'", name),
                    ));
                }
                Some(_) => {}
            }
        }

        for (name, prop) in &schema.properties {
            match obj.get(name) {
                None | Some(Value::Null) if prop.kind != ParameterType::Null => continue,
                None => continue,
                Some(v) => self.validate_value(prop, v, &join_path(path, name))?,
            }
        }

        if schema.additional_properties == Some(false) {
            let mut extra: Vec<&String> = obj
                .keys()
                .filter(|k| !schema.properties.contains_key(*k))
                .collect();
            extra.sort();
            if let Some(first) = extra.first() {
                return Err(ParamViolation::new(
                    &join_path(path, first),
                    "additionalProperties",
                    format!("Unexpected parameter '{}'", first),
                ));
            }
        }
        Ok(())
    }

    fn validate_value(
        &self,
        schema: &ParameterSchema,
        value: &Value,
        path: &str,
    ) -> Result<(), ParamViolation> {
        self.validate_type(schema.kind, value, path)?;

        if let Some(allowed) = &schema.enum_values {
            if !allowed.iter().any(|a| a == value) {
                return Err(ParamViolation::new(
                    path,
                    "enum",
                    format!("Value {} is not one of {}", value, Value::Array(allowed.clone())),
                ));
            }
        }

        match value {
            Value::Number(n) => {
                if let Some(num) = n.as_f64() {
                    self.validate_number(schema, num, path)?;
                }
            }
            Value::String(s) => self.validate_string(schema, s, path)?,
            Value::Array(items) => self.validate_array(schema, items, path)?,
            Value::Object(obj) => {
                if !schema.properties.is_empty()
                    || !schema.required.is_empty()
                    || schema.additional_properties.is_some()
                {
                    self.validate_object(schema, obj, path)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_type(
        &self,
        expected: ParameterType,
        value: &Value,
        path: &str,
    ) -> Result<(), ParamViolation> {
        let ok = match expected {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64()
                        || n.is_u64()
                        || n.as_f64().map_or(false, |f| f.is_finite() && f.fract() == 0.0)
                }
                _ => false,
            },
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
            ParameterType::Null => value.is_null(),
        };
        if ok {
            Ok(())
        } else {
            Err(ParamViolation::new(
                path,
                "type",
                format!("Expected type '{}', got '{}'", expected, ParameterType::of(value)),
            ))
        }
    }

    fn validate_number(
        &self,
        schema: &ParameterSchema,
        num: f64,
        path: &str,
    ) -> Result<(), ParamViolation> {
        if let Some(min) = schema.minimum {
            if num < min {
                return Err(ParamViolation::new(
                    path,
                    "minimum",
                    format!("Value {} is less than minimum {}", num, min),
                ));
            }
        }
        if let Some(max) = schema.maximum {
            if num > max {
                return Err(ParamViolation::new(
                    path,
                    "maximum",
                    format!("Value {} is greater than maximum {}", num, max),
                ));
            }
        }
        Ok(())
    }

    fn validate_string(
        &self,
        schema: &ParameterSchema,
        s: &str,
        path: &str,
    ) -> Result<(), ParamViolation> {
        let len = s.chars().count();
        if let Some(min) = schema.min_length {
            if len < min {
                return Err(ParamViolation::new(
                    path,
                    "minLength",
                    format!("String too short (minimum {} characters)", min),
                ));
            }
        }
        if let Some(max) = schema.max_length {
            if len > max {
                return Err(ParamViolation::new(
                    path,
                    "maxLength",
                    format!("String too long (maximum {} characters)", max),
                ));
            }
        }
        if let Some(pattern) = &schema.pattern {
            if let Some(re) = self.patterns.get(pattern) {
                if !re.is_match(s) {
                    return Err(ParamViolation::new(
                        path,
                        "pattern",
                        format!("String does not match pattern '{}'", pattern),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_array(
        &self,
        schema: &ParameterSchema,
        items: &[Value],
        path: &str,
    ) -> Result<(), ParamViolation> {
        if let Some(min) = schema.min_items {
            if items.len() < min {
                return Err(ParamViolation::new(
                    path,
                    "minItems",
                    format!("Array too short (minimum {} items)", min),
                ));
            }
        }
        if let Some(max) = schema.max_items {
            if items.len() > max {
                return Err(ParamViolation::new(
                    path,
                    "maxItems",
                    format!("Array too long (maximum {} items)", max),
                ));
            }
        }
        if let Some(item_schema) = &schema.items {
            for (i, item) in items.iter().enumerate() {
                self.validate_value(item_schema, item, &format!("{}[{}]", path, i))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn schema() -> ParameterSchema {
        ParameterSchema::object()
            .with_property("name", ParameterSchema::string().with_length(Some(1), Some(8)))
            .with_property("count", ParameterSchema::integer().with_range(Some(0.0), Some(10.0)))
            .with_property(
                "mode",
                ParameterSchema::string().with_enum(vec![json!("append"), json!("replace")]),
            )
            .with_property("code", ParameterSchema::string().with_pattern("^[A-Z]{3}$"))
            .with_property(
                "attrs",
                ParameterSchema::array(
                    ParameterSchema::object()
                        .with_property("name", ParameterSchema::string())
                        .with_required("name"),
                ),
            )
            .with_required("name")
    }

    fn check(v: Value) -> Result<(), ParamViolation> {
        let cache = PatternCache::new(8);
        ParameterValidator::new(&cache).validate_args(&schema(), &args(v))
    }

    #[test]
    fn accepts_valid_arguments() {
        assert!(check(json!({"name": "a", "count": 3, "mode": "append", "code": "ABC"})).is_ok());
        assert!(check(json!({"name": "a", "count": 3.0})).is_ok());
        assert!(check(json!({"name": "a", "count": null})).is_ok());
    }

    #[test]
    fn reports_first_violation_with_path() {
        let v = check(json!({"count": 3})).unwrap_err();
        assert_eq!((v.path.as_str(), v.constraint), ("name", "required"));

        let v = check(json!({"name": "a", "count": "3"})).unwrap_err();
        assert_eq!((v.path.as_str(), v.constraint), ("count", "type"));

        let v = check(json!({"name": "a", "count": 11})).unwrap_err();
        assert_eq!(v.constraint, "maximum");

        let v = check(json!({"name": "a", "count": 2.5})).unwrap_err();
        assert_eq!(v.constraint, "type");

        let v = check(json!({"name": "a", "mode": "merge"})).unwrap_err();
        assert_eq!(v.constraint, "enum");

        let v = check(json!({"name": "a", "code": "abc"})).unwrap_err();
        assert_eq!(v.constraint, "pattern");

        let v = check(json!({"name": "much too long"})).unwrap_err();
        assert_eq!(v.constraint, "maxLength");
    }

    #[test]
    fn validates_nested_array_items() {
        let v = check(json!({"name": "a", "attrs": [{"name": "x"}, {"title": "y"}]})).unwrap_err();
        assert_eq!(v.path, "attrs[1].name");
        assert_eq!(v.constraint, "required");
    }

    #[test]
    fn rejects_additional_properties_when_closed() {
        let cache = PatternCache::new(8);
        let schema = ParameterSchema::object()
            .with_property("a", ParameterSchema::string())
            .with_additional_properties(false);
        let v = ParameterValidator::new(&cache)
            .validate_args(&schema, &args(json!({"a": "x", "z": 1, "b": 2})))
            .unwrap_err();
        assert_eq!(v.path, "b");
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let cache = PatternCache::new(8);
        let schema = ParameterSchema::object()
            .with_property("s", ParameterSchema::string().with_pattern("(unclosed"));
        assert!(ParameterValidator::new(&cache)
            .validate_args(&schema, &args(json!({"s": "anything"})))
            .is_ok());
    }

    #[test]
    fn nesting_depth_counts_containers() {
        assert_eq!(nesting_depth(&json!(1), 10), 0);
        assert_eq!(nesting_depth(&json!({}), 10), 1);
        assert_eq!(nesting_depth(&json!({"a": [{"b": 1}]}), 10), 3);
        // Stops early once the limit is passed.
        assert_eq!(nesting_depth(&json!([[[[[1]]]]]), 2), 3);
    }
}
