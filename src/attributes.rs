use std::{borrow::Cow, collections::HashMap};

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Subject attributes used for rule matching.
pub type SubjectAttributes = HashMap<String, AttributeValue>;

/// Value of a subject attribute.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value. Treated like a missing attribute.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl AttributeValue {
    /// String form used by text operators. `Null` has none and behaves like a missing attribute.
    pub(crate) fn to_text(&self) -> Option<Cow<'_, str>> {
        match self {
            AttributeValue::String(s) => Some(Cow::Borrowed(s)),
            AttributeValue::Number(n) => Some(Cow::Owned(n.to_string())),
            AttributeValue::Boolean(b) => Some(Cow::Owned(b.to_string())),
            AttributeValue::Null => None,
        }
    }
}
