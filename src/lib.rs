//! A client for randomized assignment of experiment variations.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`] that assigns experiment variations to `subjects`, where
//! each subject has a unique key and key-value attributes associated with it. Flag configuration is
//! polled from the control plane in the background and cached in memory, so assignment never waits
//! on the network.
//!
//! Assignment is deterministic: the same subject always lands in the same shard of a flag, which
//! decides whether the subject is part of the experiment sample and which variation it gets.
//!
//! An [`AssignmentLogger`] should be provided to save assignment events to your storage,
//! facilitating tracking of which subject received which variation.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Assignment functions return `Ok(None)` whenever a subject simply gets no variation. Errors are
//! returned for invalid arguments and for an API key rejected by the control plane. In production,
//! it is recommended to fall back to a default value on error.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `rac` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into client operations.
//!
//! # Examples
//!
//! A runnable example lives in the `demos/simple` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod assignment_logger;
mod attributes;
mod client;
mod config;
mod config_cache;
mod configuration;
mod configuration_fetcher;
mod configuration_requestor;
mod error;
mod eval;
mod poller;
mod rules;
mod sharder;
mod variation_type;

pub use assignment_logger::{AssignmentEvent, AssignmentLogger, AssignmentLoggerError};
pub use attributes::{AttributeValue, SubjectAttributes};
pub use client::Client;
pub use config::ClientConfig;
pub use config_cache::ConfigCache;
pub use configuration::{parse_configurations, Allocation, FlagConfiguration, Variation};
pub use configuration_fetcher::{ConfigFetcher, HttpConfigFetcher, RAC_ENDPOINT};
pub use configuration_requestor::ConfigRequestor;
pub use error::{Error, Result};
pub use eval::Assignment;
pub use poller::{Poller, PollerConfig, PollerState};
pub use rules::{find_matching_rule, Condition, ConditionValue, Operator, Rule, Value};
pub use sharder::{Md5Sharder, ShardRange, Sharder};
pub use variation_type::VariationType;
