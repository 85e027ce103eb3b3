use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    configuration::FlagConfiguration,
    rules::find_matching_rule,
    sharder::{content_hash, Sharder},
    AssignmentEvent, SubjectAttributes, VariationType,
};

/// Value assigned to a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Raw (string) form of the value.
    pub value: String,
    /// Typed form of the value.
    pub typed_value: serde_json::Value,
}

impl Assignment {
    /// Returns the value if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.typed_value.as_str()
    }

    /// Returns the value if it is a number.
    pub fn as_numeric(&self) -> Option<f64> {
        self.typed_value.as_f64()
    }

    /// Returns the value if it is a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        self.typed_value.as_bool()
    }

    /// Returns the typed value as JSON.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.typed_value
    }
}

// The salts are part of the hashing contract shared with other clients of the same control plane.
fn exposure_shard_input(subject_key: &str, flag_key: &str) -> String {
    format!("exposure-{subject_key}-{flag_key}")
}

fn assignment_shard_input(subject_key: &str, flag_key: &str) -> String {
    format!("assignment-{subject_key}-{flag_key}")
}

impl FlagConfiguration {
    /// Evaluate the flag for a subject.
    ///
    /// Returns `None` when the subject gets no assignment. The event is `None` for override
    /// assignments, which are not logged.
    pub fn eval(
        &self,
        subject_key: &str,
        subject_attributes: &SubjectAttributes,
        expected_type: Option<VariationType>,
        sharder: &impl Sharder,
    ) -> Option<(Assignment, Option<AssignmentEvent>)> {
        if let Some(assignment) = self.get_override(subject_key, expected_type) {
            log::debug!(target: "rac", flag_key:display = self.key, subject_key; "using subject override");
            return Some((assignment, None));
        }

        if !self.enabled {
            log::debug!(target: "rac", flag_key:display = self.key; "no assigned variation: flag is disabled");
            return None;
        }

        let Some(rule) = find_matching_rule(subject_attributes, &self.rules) else {
            log::debug!(target: "rac",
                        flag_key:display = self.key,
                        subject_attributes:serde;
                        "no assigned variation: subject attributes do not match targeting rules");
            return None;
        };

        let Some(allocation) = self.allocations.get(&rule.allocation_key) else {
            log::warn!(target: "rac",
                       flag_key:display = self.key,
                       allocation_key:display = rule.allocation_key;
                       "internal: unable to find allocation");
            return None;
        };

        let exposure_shard = sharder.get_shard(
            &exposure_shard_input(subject_key, &self.key),
            self.subject_shards,
        );
        if f64::from(exposure_shard) > allocation.percent_exposure * f64::from(self.subject_shards) {
            log::debug!(target: "rac",
                        flag_key:display = self.key,
                        subject_key;
                        "no assigned variation: subject is not part of experiment sample population");
            return None;
        }

        let assignment_shard = sharder.get_shard(
            &assignment_shard_input(subject_key, &self.key),
            self.subject_shards,
        );
        let Some(variation) = allocation.find_variation(assignment_shard) else {
            log::debug!(target: "rac",
                        flag_key:display = self.key,
                        subject_key,
                        assignment_shard;
                        "no assigned variation: no variation covers shard");
            return None;
        };

        if let Some(expected_type) = expected_type {
            if !expected_type.matches(&variation.value, &variation.typed_value) {
                log::debug!(target: "rac",
                            flag_key:display = self.key,
                            variation:display = variation.name;
                            "no assigned variation: variation does not have expected type {:?}", expected_type);
                return None;
            }
        }

        let event = AssignmentEvent {
            experiment: self.key.clone(),
            allocation: rule.allocation_key.clone(),
            variation: variation.value.clone(),
            subject: subject_key.to_owned(),
            subject_attributes: subject_attributes.clone(),
            timestamp: Utc::now().to_rfc3339(),
            meta_data: HashMap::from([
                ("sdkLanguage".to_owned(), "rust".to_owned()),
                (
                    "sdkVersion".to_owned(),
                    env!("CARGO_PKG_VERSION").to_owned(),
                ),
            ]),
        };

        let assignment = Assignment {
            value: variation.value.clone(),
            typed_value: variation.typed_value.clone(),
        };

        Some((assignment, Some(event)))
    }

    fn get_override(&self, subject_key: &str, expected_type: Option<VariationType>) -> Option<Assignment> {
        if self.overrides.is_empty() {
            return None;
        }

        let subject_hash = content_hash(subject_key);
        let value = self.overrides.get(&subject_hash)?;
        let typed_value = self
            .typed_overrides
            .get(&subject_hash)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::String(value.clone()));

        match expected_type {
            Some(expected_type) if !expected_type.matches(value, &typed_value) => None,
            _ => Some(Assignment {
                value: value.clone(),
                typed_value,
            }),
        }
    }
}
