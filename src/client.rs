use std::{sync::Arc, time::Duration};

use crate::{
    config_cache::ConfigCache,
    configuration_fetcher::{ConfigFetcher, HttpConfigFetcher},
    configuration_requestor::ConfigRequestor,
    eval::Assignment,
    poller::Poller,
    sharder::Md5Sharder,
    AssignmentEvent, AssignmentLogger, ClientConfig, Error, Result, SubjectAttributes,
    VariationType,
};

/// A client that assigns experiment variations to subjects.
///
/// In order to create a client instance, first create [`ClientConfig`]. The client owns a
/// background poller that keeps flag configuration up to date. Assignment calls only read the
/// in-memory configuration and never perform network I/O.
///
/// # Examples
/// ```no_run
/// # use rac_client::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::from_api_key("api-key")).unwrap();
/// ```
pub struct Client<'a> {
    requestor: Arc<ConfigRequestor>,
    assignment_logger: Option<Box<dyn AssignmentLogger + Send + Sync + 'a>>,
    poller: Poller,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration and start polling for
    /// configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidValue`] if the API key is blank.
    /// - [`Error::InvalidBaseUrl`] if the base URL is invalid.
    /// - [`Error::Io`] if the poller thread could not be started.
    pub fn new(config: ClientConfig<'a>) -> Result<Self> {
        validate_not_blank("api_key", &config.api_key)?;

        let poller_config = config.poller_config();
        let fetcher: Box<dyn ConfigFetcher + Send + Sync> = match config.config_fetcher {
            Some(fetcher) => fetcher,
            None => Box::new(HttpConfigFetcher::new(config.base_url, config.api_key)?),
        };
        let requestor = Arc::new(ConfigRequestor::with_boxed_fetcher(
            fetcher,
            ConfigCache::new(config.cache_capacity),
        ));

        let poller = {
            let requestor = Arc::clone(&requestor);
            Poller::new(poller_config, move || {
                requestor.fetch_and_store_configurations()
            })
        };
        poller.start()?;

        Ok(Client {
            requestor,
            assignment_logger: config.assignment_logger,
            poller,
        })
    }

    #[cfg(test)]
    fn new_with_requestor(
        requestor: Arc<ConfigRequestor>,
        assignment_logger: Option<Box<dyn AssignmentLogger + Send + Sync + 'a>>,
    ) -> Self {
        Client {
            requestor,
            assignment_logger,
            poller: Poller::new(Default::default(), || Ok(())),
        }
    }

    /// Get the raw (string) value of the variation assigned to the subject.
    ///
    /// Returns `Ok(None)` if the subject gets no assignment: the flag is unknown or disabled, the
    /// subject doesn't match targeting rules, or it is outside of the experiment sample.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidValue`] if `subject_key` or `flag_key` is blank.
    /// - [`Error::Unauthorized`] if the API key has been rejected.
    pub fn get_assignment(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<String>> {
        let assignment =
            self.get_assignment_details(subject_key, flag_key, subject_attributes, None)?;
        Ok(assignment.map(|assignment| assignment.value))
    }

    /// Get the assigned variation as a string. Returns `Ok(None)` if the assigned variation is not a
    /// string.
    pub fn get_string_assignment(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<String>> {
        let assignment = self.get_assignment_details(
            subject_key,
            flag_key,
            subject_attributes,
            Some(VariationType::String),
        )?;
        Ok(assignment.and_then(|assignment| match assignment.typed_value {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        }))
    }

    /// Get the assigned variation as a number. Returns `Ok(None)` if the assigned variation is not
    /// numeric.
    pub fn get_numeric_assignment(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<f64>> {
        let assignment = self.get_assignment_details(
            subject_key,
            flag_key,
            subject_attributes,
            Some(VariationType::Numeric),
        )?;
        Ok(assignment.and_then(|assignment| assignment.as_numeric()))
    }

    /// Get the assigned variation as a boolean. Returns `Ok(None)` if the assigned variation is not
    /// a boolean.
    pub fn get_boolean_assignment(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<bool>> {
        let assignment = self.get_assignment_details(
            subject_key,
            flag_key,
            subject_attributes,
            Some(VariationType::Boolean),
        )?;
        Ok(assignment.and_then(|assignment| assignment.as_boolean()))
    }

    /// Get the assigned variation as a JSON value. Returns `Ok(None)` if the raw value of the
    /// assigned variation does not parse to its typed value.
    pub fn get_json_assignment(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
    ) -> Result<Option<serde_json::Value>> {
        let assignment = self.get_assignment_details(
            subject_key,
            flag_key,
            subject_attributes,
            Some(VariationType::Json),
        )?;
        Ok(assignment.map(|assignment| assignment.typed_value))
    }

    /// Get the variation assigned to the subject, checking it against `expected_type` if given.
    ///
    /// Every assignment except an override is passed to the assignment logger exactly once.
    pub fn get_assignment_details(
        &self,
        subject_key: &str,
        flag_key: &str,
        subject_attributes: &SubjectAttributes,
        expected_type: Option<VariationType>,
    ) -> Result<Option<Assignment>> {
        validate_not_blank("subject_key", subject_key)?;
        validate_not_blank("flag_key", flag_key)?;

        let Some(configuration) = self.requestor.get_configuration(flag_key)? else {
            log::warn!(target: "rac", flag_key, subject_key; "no assigned variation: no configuration found for flag");
            return Ok(None);
        };

        let evaluation =
            configuration.eval(subject_key, subject_attributes, expected_type, &Md5Sharder);

        log::trace!(target: "rac",
                    flag_key,
                    subject_key,
                    subject_attributes:serde,
                    assignment:serde = evaluation.as_ref().map(|(assignment, _event)| assignment);
                    "evaluated a flag");

        let Some((assignment, event)) = evaluation else {
            return Ok(None);
        };

        if let Some(event) = event {
            self.log_assignment(event);
        }

        Ok(Some(assignment))
    }

    /// Block until the first configuration is fetched, or `timeout` elapses.
    ///
    /// Until configuration is fetched, all assignments return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the API key has been rejected.
    /// - [`Error::WaitTimeout`] if configuration has not been fetched in time.
    pub fn wait_for_configuration(&self, timeout: Duration) -> Result<()> {
        self.requestor.wait_for_configuration(timeout)
    }

    /// Stop polling for configuration. Assignments keep being served from the last fetched
    /// configuration. Calling it more than once is a no-op.
    pub fn shutdown(&self) {
        self.poller.stop();
    }

    fn log_assignment(&self, event: AssignmentEvent) {
        let Some(assignment_logger) = &self.assignment_logger else {
            log::debug!(target: "rac", "no assignment logger configured, skipping assignment event");
            return;
        };

        log::trace!(target: "rac", event:serde; "logging assignment");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            assignment_logger.log_assignment(event)
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(target: "rac", "error logging assignment event: {}", err);
            }
            Err(_) => {
                log::warn!(target: "rac", "assignment logger panicked, assignment event dropped");
            }
        }
    }
}

fn validate_not_blank(field_name: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidValue(field_name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use serde_json::json;

    use crate::{
        assignment_logger::AssignmentLoggerError, config_cache::ConfigCache,
        configuration_requestor::ConfigRequestor, AssignmentEvent, AssignmentLogger, Client,
        ClientConfig, Error, Result,
    };

    #[derive(Clone, Default)]
    struct RecordingLogger(Arc<Mutex<Vec<AssignmentEvent>>>);

    impl AssignmentLogger for RecordingLogger {
        fn log_assignment(&self, event: AssignmentEvent) -> std::result::Result<(), AssignmentLoggerError> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FailingLogger;

    impl AssignmentLogger for FailingLogger {
        fn log_assignment(&self, _event: AssignmentEvent) -> std::result::Result<(), AssignmentLoggerError> {
            Err("logging error".into())
        }
    }

    fn flag(enabled: bool, percent_exposure: f64, conditions: serde_json::Value) -> serde_json::Value {
        json!({
            "subjectShards": 10000,
            "enabled": enabled,
            "name": "recommendation_algo",
            "overrides": {"d6d7705392bc7af633328bea8c4c6904": "override-variation"},
            "rules": [{"allocationKey": "allocation", "conditions": conditions}],
            "allocations": {
                "allocation": {
                    "percentExposure": percent_exposure,
                    "variations": [{
                        "name": "control",
                        "value": "control",
                        "typedValue": "control",
                        "shardRange": {"start": 0, "end": 10000}
                    }]
                }
            }
        })
    }

    fn document() -> serde_json::Value {
        json!({
            "flags": {
                "experiment-key-1": flag(true, 1.0, json!([
                    {"attribute": "email", "operator": "MATCHES", "value": ".*@eppo.com"}
                ])),
                "everyone": flag(true, 1.0, json!([])),
                "disabled": flag(false, 1.0, json!([])),
                "not-in-sample": flag(true, 0.0, json!([])),
                "typed": {
                    "subjectShards": 100,
                    "enabled": true,
                    "rules": [{"allocationKey": "allocation", "conditions": []}],
                    "allocations": {
                        "allocation": {
                            "percentExposure": 1,
                            "variations": [{
                                "name": "config",
                                "value": "{\"limit\": 5}",
                                "typedValue": {"limit": 5},
                                "shardRange": {"start": 0, "end": 100}
                            }]
                        }
                    }
                }
            }
        })
    }

    fn fetched_requestor() -> Arc<ConfigRequestor> {
        let fetcher = |_: &str| -> Result<serde_json::Value> { Ok(document()) };
        let requestor = Arc::new(ConfigRequestor::new(fetcher, ConfigCache::new(100)));
        requestor.fetch_and_store_configurations().unwrap();
        requestor
    }

    fn client_with_logger<'a>(
        assignment_logger: impl AssignmentLogger + Send + Sync + 'a,
    ) -> Client<'a> {
        Client::new_with_requestor(fetched_requestor(), Some(Box::new(assignment_logger)))
    }

    fn attributes(email: &str) -> HashMap<String, crate::AttributeValue> {
        HashMap::from([("email".to_owned(), email.into())])
    }

    #[test]
    fn rejects_blank_keys() {
        let client = client_with_logger(RecordingLogger::default());

        assert!(matches!(
            client.get_assignment("subject-1", "", &HashMap::new()),
            Err(Error::InvalidValue("flag_key"))
        ));
        assert!(matches!(
            client.get_assignment(" ", "experiment-key-1", &HashMap::new()),
            Err(Error::InvalidValue("subject_key"))
        ));
    }

    #[test]
    fn rejects_blank_api_key() {
        assert!(matches!(
            Client::new(ClientConfig::from_api_key("")),
            Err(Error::InvalidValue("api_key"))
        ));
    }

    #[test]
    fn returns_none_while_no_configuration() {
        let fetcher = |_: &str| -> Result<serde_json::Value> { Ok(document()) };
        let requestor = Arc::new(ConfigRequestor::new(fetcher, ConfigCache::new(100)));
        let client = Client::new_with_requestor(requestor, None);

        assert_eq!(
            client
                .get_assignment("user-1", "experiment-key-1", &HashMap::new())
                .unwrap(),
            None
        );
    }

    #[test]
    fn assigns_subject_with_attributes_and_rules() {
        let client = client_with_logger(RecordingLogger::default());

        assert_eq!(
            client
                .get_assignment("user-1", "experiment-key-1", &HashMap::new())
                .unwrap(),
            None
        );
        assert_eq!(
            client
                .get_assignment("user-1", "experiment-key-1", &attributes("test@example.com"))
                .unwrap(),
            None
        );
        assert_eq!(
            client
                .get_assignment("user1", "experiment-key-1", &attributes("test@eppo.com"))
                .unwrap()
                .as_deref(),
            Some("control")
        );
    }

    #[test]
    fn returns_none_for_unknown_disabled_or_out_of_sample_flags() {
        let logger = RecordingLogger::default();
        let client = client_with_logger(logger.clone());

        for flag_key in ["unknown", "disabled", "not-in-sample"] {
            assert_eq!(
                client
                    .get_assignment("user-2", flag_key, &HashMap::new())
                    .unwrap(),
                None,
                "{flag_key}"
            );
        }
        assert!(logger.0.lock().unwrap().is_empty());
    }

    #[test]
    fn logs_assignment_once() {
        let logger = RecordingLogger::default();
        let client = client_with_logger(logger.clone());
        let subject_attributes = attributes("test@eppo.com");

        assert_eq!(
            client
                .get_assignment("user1", "experiment-key-1", &subject_attributes)
                .unwrap()
                .as_deref(),
            Some("control")
        );

        let events = logger.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.experiment, "experiment-key-1");
        assert_eq!(event.allocation, "allocation");
        assert_eq!(event.variation, "control");
        assert_eq!(event.subject, "user1");
        assert_eq!(event.subject_attributes, subject_attributes);
        assert!(!event.timestamp.is_empty());
    }

    #[test]
    fn handles_logging_error() {
        let client = client_with_logger(FailingLogger);

        assert_eq!(
            client
                .get_assignment("user-2", "everyone", &HashMap::new())
                .unwrap()
                .as_deref(),
            Some("control")
        );
    }

    #[test]
    fn handles_panicking_logger() {
        let client = client_with_logger(|_event: AssignmentEvent| panic!("logger failed"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            client.get_assignment("user-2", "everyone", &HashMap::new())
        }));

        assert_eq!(
            result
                .expect("logger panic must not reach the caller")
                .unwrap()
                .as_deref(),
            Some("control")
        );
    }

    #[test]
    fn works_without_assignment_logger() {
        let client = Client::new_with_requestor(fetched_requestor(), None);

        assert_eq!(
            client
                .get_assignment("user-2", "everyone", &HashMap::new())
                .unwrap()
                .as_deref(),
            Some("control")
        );
    }

    #[test]
    fn closure_logger() {
        let events = Mutex::new(Vec::new());
        {
            let client = client_with_logger(|event: AssignmentEvent| {
                events.lock().unwrap().push(event);
            });
            client
                .get_assignment("user-2", "everyone", &HashMap::new())
                .unwrap();
        }
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn subject_in_overrides() {
        let logger = RecordingLogger::default();
        let client = client_with_logger(logger.clone());

        for flag_key in ["everyone", "disabled", "not-in-sample"] {
            assert_eq!(
                client
                    .get_assignment("user-1", flag_key, &HashMap::new())
                    .unwrap()
                    .as_deref(),
                Some("override-variation"),
                "{flag_key}"
            );
        }
        assert!(logger.0.lock().unwrap().is_empty());
    }

    #[test]
    fn typed_assignments() {
        let client = client_with_logger(RecordingLogger::default());
        let no_attributes = HashMap::new();

        assert_eq!(
            client
                .get_string_assignment("user-2", "everyone", &no_attributes)
                .unwrap()
                .as_deref(),
            Some("control")
        );
        assert_eq!(
            client
                .get_numeric_assignment("user-2", "everyone", &no_attributes)
                .unwrap(),
            None
        );
        assert_eq!(
            client
                .get_boolean_assignment("user-2", "everyone", &no_attributes)
                .unwrap(),
            None
        );
        assert_eq!(
            client
                .get_json_assignment("user-2", "typed", &no_attributes)
                .unwrap(),
            Some(json!({"limit": 5}))
        );
        assert_eq!(
            client
                .get_string_assignment("user-2", "typed", &no_attributes)
                .unwrap(),
            None
        );
    }

    #[test]
    fn unauthorized_is_surfaced_to_caller() {
        let fetcher = |_: &str| -> Result<serde_json::Value> { Err(Error::Unauthorized) };
        let requestor = Arc::new(ConfigRequestor::new(fetcher, ConfigCache::new(100)));
        let _ = requestor.fetch_and_store_configurations();
        let client = Client::new_with_requestor(requestor, None);

        assert!(matches!(
            client.get_assignment("user-1", "experiment-key-1", &HashMap::new()),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn polls_configuration_in_background() {
        let mut config = ClientConfig::from_api_key("dummy");
        config
            .config_fetcher(|_: &str| -> Result<serde_json::Value> { Ok(document()) })
            .poll_interval(Duration::from_millis(50))
            .poll_jitter(Duration::from_millis(5));
        let client = config.to_client().unwrap();

        client.wait_for_configuration(Duration::from_secs(5)).unwrap();
        assert_eq!(
            client
                .get_assignment("user1", "experiment-key-1", &attributes("test@eppo.com"))
                .unwrap()
                .as_deref(),
            Some("control")
        );

        client.shutdown();
        client.shutdown();

        // The last fetched configuration is still served after shutdown.
        assert_eq!(
            client
                .get_assignment("user-2", "everyone", &HashMap::new())
                .unwrap()
                .as_deref(),
            Some("control")
        );
    }
}
