//! Flag configuration model.
//!
//! Configuration objects are immutable once built. A new snapshot is parsed from the control plane
//! on every successful poll and swapped into the cache as a whole.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{rules::Rule, sharder::ShardRange, Error, Result};

/// Configuration of a single flag (experiment).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagConfiguration {
    pub(crate) key: String,
    pub(crate) name: Option<String>,
    pub(crate) enabled: bool,
    pub(crate) subject_shards: u32,
    pub(crate) rules: Vec<Rule>,
    pub(crate) allocations: HashMap<String, Allocation>,
    /// Subject hash to raw override value.
    pub(crate) overrides: HashMap<String, String>,
    /// Subject hash to typed override value.
    pub(crate) typed_overrides: HashMap<String, serde_json::Value>,
}

impl FlagConfiguration {
    /// Flag key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable flag name, if configured.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Disabled flags assign nothing except overrides.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Size of the shard space used by this flag.
    pub fn subject_shards(&self) -> u32 {
        self.subject_shards
    }

    /// Targeting rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Allocation named `key`.
    pub fn allocation(&self, key: &str) -> Option<&Allocation> {
        self.allocations.get(key)
    }
}

/// Share of the population exposed to the experiment and the variations it is split into.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub(crate) percent_exposure: f64,
    pub(crate) variations: Vec<Variation>,
}

impl Allocation {
    /// Share of subject shards in the experiment sample, in `[0, 1]`.
    pub fn percent_exposure(&self) -> f64 {
        self.percent_exposure
    }

    /// Variations in evaluation order.
    pub fn variations(&self) -> &[Variation] {
        &self.variations
    }

    /// First variation whose shard range contains `shard`. Ranges are not assumed to partition the
    /// shard space.
    pub fn find_variation(&self, shard: u32) -> Option<&Variation> {
        self.variations
            .iter()
            .find(|variation| variation.shard_range.contains(shard))
    }
}

/// A variation and the assignment shards it covers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) typed_value: serde_json::Value,
    pub(crate) shard_range: ShardRange,
}

impl Variation {
    /// Variation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw (string) value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Typed value.
    pub fn typed_value(&self) -> &serde_json::Value {
        &self.typed_value
    }

    /// Assignment shards covered by this variation.
    pub fn shard_range(&self) -> ShardRange {
        self.shard_range
    }
}

// Wire format of the configuration endpoint.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfigurationResponse {
    #[serde(default)]
    flags: HashMap<String, RawFlag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFlag {
    subject_shards: u32,
    enabled: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    overrides: HashMap<String, String>,
    #[serde(default)]
    typed_overrides: HashMap<String, serde_json::Value>,
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    allocations: HashMap<String, RawAllocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAllocation {
    percent_exposure: f64,
    #[serde(default)]
    variations: Vec<RawVariation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariation {
    name: String,
    value: String,
    #[serde(default)]
    typed_value: Option<serde_json::Value>,
    shard_range: ShardRange,
}

/// Parse a configuration document (`{"flags": {...}}`) into flag configurations keyed by flag key.
///
/// Either every flag parses and validates, or an error is returned and nothing is produced.
pub fn parse_configurations(document: serde_json::Value) -> Result<HashMap<String, FlagConfiguration>> {
    let response: RawConfigurationResponse = serde_json::from_value(document)?;

    response
        .flags
        .into_iter()
        .map(|(key, raw)| {
            let flag = FlagConfiguration::from_raw(key.clone(), raw)?;
            Ok((key, flag))
        })
        .collect()
}

impl FlagConfiguration {
    fn from_raw(key: String, raw: RawFlag) -> Result<FlagConfiguration> {
        if raw.subject_shards == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "flag {key:?} has subjectShards = 0"
            )));
        }

        let allocations = raw
            .allocations
            .into_iter()
            .map(|(allocation_key, allocation)| {
                let allocation = Allocation::from_raw(&key, &allocation_key, allocation)?;
                Ok((allocation_key, allocation))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        if let Some(rule) = raw
            .rules
            .iter()
            .find(|rule| !allocations.contains_key(&rule.allocation_key))
        {
            return Err(Error::InvalidConfiguration(format!(
                "flag {key:?} has a rule referencing unknown allocation {:?}",
                rule.allocation_key
            )));
        }

        Ok(FlagConfiguration {
            key,
            name: raw.name,
            enabled: raw.enabled,
            subject_shards: raw.subject_shards,
            rules: raw.rules,
            allocations,
            overrides: raw.overrides,
            typed_overrides: raw.typed_overrides,
        })
    }
}

impl Allocation {
    fn from_raw(flag_key: &str, allocation_key: &str, raw: RawAllocation) -> Result<Allocation> {
        if !(0.0..=1.0).contains(&raw.percent_exposure) {
            return Err(Error::InvalidConfiguration(format!(
                "allocation {allocation_key:?} of flag {flag_key:?} has percentExposure {} outside of [0, 1]",
                raw.percent_exposure
            )));
        }

        let variations = raw
            .variations
            .into_iter()
            .map(|variation| Variation {
                // Configurations predating typed values only carry the string form.
                typed_value: variation
                    .typed_value
                    .unwrap_or_else(|| serde_json::Value::String(variation.value.clone())),
                name: variation.name,
                value: variation.value,
                shard_range: variation.shard_range,
            })
            .collect();

        Ok(Allocation {
            percent_exposure: raw.percent_exposure,
            variations,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use crate::{
        rules::{Condition, Operator, Rule},
        sharder::ShardRange,
        Error,
    };

    use super::{parse_configurations, Allocation, FlagConfiguration, Variation};

    /// Flag with a single allocation holding one variation over the whole shard space.
    pub(crate) fn single_variation_flag(
        key: &str,
        percent_exposure: f64,
        rules: Vec<Rule>,
    ) -> FlagConfiguration {
        FlagConfiguration {
            key: key.to_owned(),
            name: Some(key.to_owned()),
            enabled: true,
            subject_shards: 10_000,
            rules,
            allocations: HashMap::from([(
                "allocation".to_owned(),
                Allocation {
                    percent_exposure,
                    variations: vec![Variation {
                        name: "control".to_owned(),
                        value: "control".to_owned(),
                        typed_value: json!("control"),
                        shard_range: ShardRange::new(0, 10_000),
                    }],
                },
            )]),
            overrides: HashMap::new(),
            typed_overrides: HashMap::new(),
        }
    }

    pub(crate) fn match_all_rule() -> Rule {
        Rule {
            allocation_key: "allocation".to_owned(),
            conditions: vec![],
        }
    }

    pub(crate) fn email_rule(pattern: &str) -> Rule {
        Rule {
            allocation_key: "allocation".to_owned(),
            conditions: vec![Condition {
                attribute: "email".to_owned(),
                operator: Operator::Matches,
                value: pattern.into(),
            }],
        }
    }

    fn document() -> serde_json::Value {
        json!({
            "flags": {
                "randomization_algo": {
                    "subjectShards": 10000,
                    "enabled": true,
                    "name": "randomization_algo",
                    "overrides": {"d6d7705392bc7af633328bea8c4c6904": "override-variation"},
                    "typedOverrides": {"d6d7705392bc7af633328bea8c4c6904": "override-variation"},
                    "rules": [
                        {
                            "allocationKey": "allocation-experiment-1",
                            "conditions": [
                                {"attribute": "appVersion", "operator": "GTE", "value": "1.2.0"}
                            ]
                        }
                    ],
                    "allocations": {
                        "allocation-experiment-1": {
                            "percentExposure": 0.4533,
                            "variations": [
                                {
                                    "name": "control",
                                    "value": "control",
                                    "typedValue": "control",
                                    "shardRange": {"start": 0, "end": 3333}
                                },
                                {
                                    "name": "red",
                                    "value": "red",
                                    "shardRange": {"start": 3333, "end": 6666}
                                },
                                {
                                    "name": "green",
                                    "value": "{\"hex\": \"#00ff00\"}",
                                    "typedValue": {"hex": "#00ff00"},
                                    "shardRange": {"start": 6666, "end": 10000}
                                }
                            ]
                        }
                    }
                },
                "disabled_flag": {
                    "subjectShards": 100,
                    "enabled": false,
                    "allocations": {}
                }
            }
        })
    }

    #[test]
    fn parses_document() {
        let flags = parse_configurations(document()).unwrap();
        assert_eq!(flags.len(), 2);

        let flag = &flags["randomization_algo"];
        assert_eq!(flag.key(), "randomization_algo");
        assert!(flag.is_enabled());
        assert_eq!(flag.subject_shards(), 10_000);
        assert_eq!(flag.rules().len(), 1);
        assert_eq!(flag.rules()[0].conditions().len(), 1);

        let allocation = flag.allocation("allocation-experiment-1").unwrap();
        assert_eq!(allocation.percent_exposure(), 0.4533);
        assert_eq!(allocation.variations().len(), 3);
        assert_eq!(allocation.find_variation(3333).unwrap().name(), "red");
        assert_eq!(allocation.find_variation(9999).unwrap().name(), "green");
        assert!(allocation.find_variation(10_000).is_none());

        // typedValue falls back to the raw string
        assert_eq!(allocation.variations()[1].typed_value(), &json!("red"));
        assert_eq!(
            allocation.variations()[2].typed_value(),
            &json!({"hex": "#00ff00"})
        );

        let disabled = &flags["disabled_flag"];
        assert!(!disabled.is_enabled());
        assert!(disabled.name().is_none());
        assert!(disabled.rules().is_empty());
        assert!(disabled.overrides.is_empty());
    }

    #[test]
    fn first_matching_variation_wins_on_overlap() {
        let allocation = Allocation {
            percent_exposure: 1.0,
            variations: vec![
                Variation {
                    name: "a".into(),
                    value: "a".into(),
                    typed_value: json!("a"),
                    shard_range: ShardRange::new(0, 60),
                },
                Variation {
                    name: "b".into(),
                    value: "b".into(),
                    typed_value: json!("b"),
                    shard_range: ShardRange::new(40, 100),
                },
            ],
        };
        assert_eq!(allocation.find_variation(50).unwrap().name(), "a");
        assert_eq!(allocation.find_variation(60).unwrap().name(), "b");
    }

    #[test]
    fn missing_flags_is_empty() {
        assert!(parse_configurations(json!({})).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_document() {
        let result = parse_configurations(json!({"flags": {"f": {"enabled": "yes"}}}));
        assert!(matches!(result, Err(Error::ConfigurationParse(_))));
    }

    #[test]
    fn rejects_zero_subject_shards() {
        let result = parse_configurations(json!({
            "flags": {"f": {"subjectShards": 0, "enabled": true}}
        }));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_percent_exposure_out_of_range() {
        let result = parse_configurations(json!({
            "flags": {"f": {
                "subjectShards": 100,
                "enabled": true,
                "allocations": {"a": {"percentExposure": 1.5, "variations": []}}
            }}
        }));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn rejects_rule_with_unknown_allocation() {
        let result = parse_configurations(json!({
            "flags": {"f": {
                "subjectShards": 100,
                "enabled": true,
                "rules": [{"allocationKey": "missing", "conditions": []}],
                "allocations": {}
            }}
        }));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }
}
