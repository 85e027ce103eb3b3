use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::SubjectAttributes;

/// Error returned by a failing [`AssignmentLogger`].
pub type AssignmentLoggerError = Box<dyn std::error::Error + Send + Sync>;

/// An assignment that should be recorded for analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// Flag key.
    pub experiment: String,
    /// Allocation selected by the matching rule.
    pub allocation: String,
    /// Raw value of the assigned variation.
    pub variation: String,
    /// Subject key.
    pub subject: String,
    /// Attributes passed to the assignment call.
    pub subject_attributes: SubjectAttributes,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Client metadata: `sdkLanguage` and `sdkVersion`.
    pub meta_data: HashMap<String, String>,
}

/// Receives assignment events to save them to your data warehouse.
///
/// Errors are logged and otherwise ignored: a failing logger never affects the assignment returned
/// to the caller.
pub trait AssignmentLogger {
    /// Record a single assignment. Called on the thread that requested the assignment.
    fn log_assignment(&self, event: AssignmentEvent) -> Result<(), AssignmentLoggerError>;
}

impl<T: Fn(AssignmentEvent)> AssignmentLogger for T {
    fn log_assignment(&self, event: AssignmentEvent) -> Result<(), AssignmentLoggerError> {
        self(event);
        Ok(())
    }
}
