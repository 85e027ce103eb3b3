use serde::{Deserialize, Serialize};

/// Type of assignment value requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariationType {
    /// A JSON string.
    String,
    /// A JSON number.
    Numeric,
    /// A JSON boolean.
    Boolean,
    /// Any JSON value, encoded in the raw value.
    Json,
}

impl VariationType {
    /// Check that `typed_value` is of this type. For [`VariationType::Json`], the raw `value` must
    /// additionally parse to the same JSON structure as `typed_value`.
    pub fn matches(self, value: &str, typed_value: &serde_json::Value) -> bool {
        match self {
            VariationType::String => typed_value.is_string(),
            VariationType::Numeric => typed_value.is_number(),
            VariationType::Boolean => typed_value.is_boolean(),
            VariationType::Json => serde_json::from_str::<serde_json::Value>(value)
                .map_or(false, |parsed| &parsed == typed_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::VariationType;

    #[test]
    fn scalar_types() {
        assert!(VariationType::String.matches("control", &json!("control")));
        assert!(!VariationType::String.matches("1", &json!(1)));

        assert!(VariationType::Numeric.matches("1.5", &json!(1.5)));
        assert!(VariationType::Numeric.matches("3", &json!(3)));
        assert!(!VariationType::Numeric.matches("3", &json!("3")));

        assert!(VariationType::Boolean.matches("true", &json!(true)));
        assert!(!VariationType::Boolean.matches("true", &json!("true")));
    }

    #[test]
    fn json_requires_deep_equality_with_raw_value() {
        let typed = json!({"timeout": 30, "tags": ["a", "b"]});
        assert!(VariationType::Json.matches(r#"{"tags": ["a", "b"], "timeout": 30}"#, &typed));
        assert!(!VariationType::Json.matches(r#"{"tags": ["a"], "timeout": 30}"#, &typed));
        assert!(!VariationType::Json.matches("not json", &typed));
    }
}
