use std::{collections::HashMap, time::Duration};

pub fn main() -> rac_client::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("rac=debug")).init();

    let api_key = std::env::var("RAC_API_KEY").unwrap();
    let mut config = rac_client::ClientConfig::from_api_key(api_key);
    config.assignment_logger(|event: rac_client::AssignmentEvent| {
        println!("Logged assignment: {}", serde_json::to_string(&event).unwrap());
    });

    // Configuration is polled in a background thread.
    let client = config.to_client()?;

    // Until configuration arrives, the client returns None for all assignments.
    client.wait_for_configuration(Duration::from_secs(10))?;

    let subject_attributes: rac_client::SubjectAttributes = HashMap::from([
        ("email".to_owned(), "test@example.com".into()),
        ("age".to_owned(), 42.0.into()),
    ]);

    let assignment = client
        .get_string_assignment("test-subject", "experiment-key-1", &subject_attributes)?
        // default assignment
        .unwrap_or_else(|| "control".to_owned());

    println!("Assignment: {:?}", assignment);

    client.shutdown();
    Ok(())
}
