use std::borrow::Cow;

use derive_more::From;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{AttributeValue, SubjectAttributes};

/// Targeting rule. A subject matches the rule when it satisfies every condition; the matching
/// rule's `allocation_key` selects the allocation to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub(crate) allocation_key: String,
    #[serde(default)]
    pub(crate) conditions: Vec<Condition>,
}

impl Rule {
    /// Allocation selected when the rule matches.
    pub fn allocation_key(&self) -> &str {
        &self.allocation_key
    }

    /// Conditions that must all hold.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// A rule without conditions matches every subject.
    pub fn eval(&self, attributes: &SubjectAttributes) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.eval(attributes))
    }
}

/// Return the first rule (in list order) matched by `attributes`.
pub fn find_matching_rule<'a>(attributes: &SubjectAttributes, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.eval(attributes))
}

/// Single predicate over a subject attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub(crate) operator: Operator,
    pub(crate) attribute: String,
    pub(crate) value: ConditionValue,
}

impl Condition {
    /// Returns `true` if the attribute named by the condition satisfies it.
    pub fn eval(&self, attributes: &SubjectAttributes) -> bool {
        self.operator
            .eval(attributes.get(&self.attribute), &self.value)
    }
}

/// Scalar value appearing in a condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, From)]
#[serde(untagged)]
pub enum Value {
    /// A boolean operand.
    Boolean(bool),
    /// A numeric operand.
    Number(f64),
    /// A string operand: regex pattern, set member or version.
    String(String),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl Value {
    fn to_text(&self) -> Cow<'_, str> {
        match self {
            Value::Boolean(b) => Cow::Owned(b.to_string()),
            Value::Number(n) => Cow::Owned(n.to_string()),
            Value::String(s) => Cow::Borrowed(s),
        }
    }
}

/// Right-hand side of a condition: a list for set operators, a single value otherwise.
///
/// ```
/// # use rac_client::{ConditionValue, Operator, Value};
/// let countries = ConditionValue::Multiple(vec![Value::from("US"), Value::from("Canada")]);
/// assert!(Operator::OneOf.eval(Some(&"us".into()), &countries));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Used by `ONE_OF` and `NOT_ONE_OF`.
    Multiple(Vec<Value>),
    /// Regex pattern or comparison operand.
    Single(Value),
}

impl<T: Into<Value>> From<T> for ConditionValue {
    fn from(value: T) -> Self {
        Self::Single(value.into())
    }
}
impl<T: Into<Value>> From<Vec<T>> for ConditionValue {
    fn from(value: Vec<T>) -> Self {
        Self::Multiple(value.into_iter().map(Into::into).collect())
    }
}

/// Condition operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    /// Attribute text matches a regular expression.
    Matches,
    /// Greater than or equal, numerically or as semver.
    Gte,
    /// Greater than, numerically or as semver.
    Gt,
    /// Less than or equal, numerically or as semver.
    Lte,
    /// Less than, numerically or as semver.
    Lt,
    /// Attribute text equals one of the values, ignoring case.
    OneOf,
    /// Attribute text equals none of the values, ignoring case.
    NotOneOf,
}

impl Operator {
    /// Applying `Operator` to the values. Returns `false` if the attribute is missing, the operator
    /// cannot be applied, or there's a misconfiguration.
    pub fn eval(&self, attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> bool {
        self.try_eval(attribute, condition_value).unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: &ConditionValue,
    ) -> Option<bool> {
        let attribute = match attribute {
            None | Some(AttributeValue::Null) => return None,
            Some(value) => value,
        };

        match self {
            Self::Matches => {
                let s = attribute.to_text()?;
                let regex = match condition_value {
                    ConditionValue::Single(Value::String(s)) => Regex::new(s).ok()?,
                    _ => return None,
                };
                Some(regex.is_match(&s))
            }

            Self::OneOf | Self::NotOneOf => {
                let s = attribute.to_text()?.to_lowercase();
                let values = match condition_value {
                    ConditionValue::Multiple(v) => v,
                    _ => return None,
                };
                let is_one_of = values.iter().any(|v| v.to_text().to_lowercase() == s);
                let has_to_be_one_of = *self == Self::OneOf;
                Some(is_one_of == has_to_be_one_of)
            }

            Self::Gte | Self::Gt | Self::Lte | Self::Lt => {
                if let AttributeValue::Number(attribute_value) = attribute {
                    // numeric comparison
                    let condition_value = match condition_value {
                        ConditionValue::Single(Value::Number(n)) => *n,
                        ConditionValue::Single(Value::String(s)) => s.parse().ok()?,
                        _ => return None,
                    };
                    Some(self.compare(attribute_value, &condition_value))
                } else {
                    // semver comparison
                    let attribute_version = match attribute {
                        AttributeValue::String(s) => Version::parse(s).ok()?,
                        _ => return None,
                    };
                    let condition_version = match condition_value {
                        ConditionValue::Single(Value::String(s)) => Version::parse(s).ok()?,
                        _ => return None,
                    };
                    Some(self.compare(&attribute_version, &condition_version))
                }
            }
        }
    }

    fn compare<T: PartialOrd + ?Sized>(&self, attribute: &T, condition: &T) -> bool {
        match self {
            Self::Gt => attribute > condition,
            Self::Gte => attribute >= condition,
            Self::Lt => attribute < condition,
            Self::Lte => attribute <= condition,
            // only reachable from the comparison branch of try_eval
            Self::Matches | Self::OneOf | Self::NotOneOf => false,
        }
    }
}
