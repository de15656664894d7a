//! Validated query filters.
//!
//! Dimension and raw-data endpoints accept a filter map serialized as JSON. The
//! service only understands string keys with primitive (or list-of-primitive)
//! values, so [`Filters`] validates at the boundary instead of deferring to a
//! generic serializer's runtime failure.

use serde_json::{Map, Value};

use crate::error::{DmError, Result};

/// A map of filter keys to primitive-or-list-of-primitive values.
///
/// Keys serialize in sorted order, so a filter signature is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Map<String, Value>);

impl Filters {
    /// Creates an empty filter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key/value pair, rejecting values the service cannot filter by.
    ///
    /// Allowed values are JSON primitives (string, number, bool, null) and flat
    /// lists of primitives.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        check_value(&key, &value)?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Builds a filter map from an arbitrary JSON value.
    ///
    /// Fails with [`DmError::InvalidFilter`] if the value is not an object, or if
    /// any entry is a nested object or a nested list; the message names the
    /// offending key and its JSON type.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(DmError::InvalidFilter(format!(
                "filters must be a map, got {} instead",
                type_name(&value)
            )));
        };
        for (key, value) in &map {
            check_value(key, value)?;
        }
        Ok(Self(map))
    }

    /// Returns true if no filters are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of filter entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Serializes the filters to a compact JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Consumes the filters, returning the underlying JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// The JSON type name of a value, for error messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn check_value(key: &str, value: &Value) -> Result<()> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
        Value::Array(items) => {
            for item in items {
                if matches!(item, Value::Array(_) | Value::Object(_)) {
                    return Err(DmError::InvalidFilter(format!(
                        "filter {key:?} contains a nested {}; only primitives are allowed in lists",
                        type_name(item)
                    )));
                }
            }
            Ok(())
        }
        Value::Object(_) => Err(DmError::InvalidFilter(format!(
            "filter {key:?} has type map; expected a primitive or a list of primitives"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_primitives_and_flat_lists() {
        let mut filters = Filters::new();
        filters.insert("category", "Banana Republic").unwrap();
        filters.insert("section_pk", json!([707, 718])).unwrap();
        filters.insert("forecast", false).unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(
            filters.to_json(),
            r#"{"category":"Banana Republic","forecast":false,"section_pk":[707,718]}"#
        );
    }

    #[test]
    fn rejects_non_map_top_level() {
        let err = Filters::from_value(json!([0, 1, 2])).unwrap_err();
        assert!(
            err.to_string().contains("must be a map, got list instead"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn rejects_nested_values() {
        let err = Filters::from_value(json!({"k": {"nested": 1}})).unwrap_err();
        assert!(err.to_string().contains("has type map"), "{err}");

        let err = Filters::from_value(json!({"k": [[1, 2]]})).unwrap_err();
        assert!(err.to_string().contains("nested list"), "{err}");
    }
}
