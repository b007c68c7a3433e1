use std::{collections::HashMap, time::Duration};

pub fn main() -> featurevisor::Result<()> {
    // Configure env_logger to see Featurevisor SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("featurevisor")).init();

    let datafile_url = std::env::var("FEATUREVISOR_DATAFILE_URL")
        .expect("FEATUREVISOR_DATAFILE_URL env variable should contain the datafile URL");

    let client = featurevisor::ClientConfig::from_datafile_url(datafile_url)
        .refresh_interval(Duration::from_secs(30))
        .on_update(|event: &featurevisor::UpdateEvent| {
            println!(
                "Datafile updated: {} -> {}",
                event.previous_revision, event.revision
            );
        })
        .on_activation(|event: &featurevisor::ActivationEvent| {
            println!("Activation event: {:?}", event.captured_context);
        })
        .to_client()?;

    // Block waiting for the datafile. Until this call returns, every feature evaluates as not
    // found.
    if let Err(err) = client.wait_until_ready() {
        println!("error fetching datafile: {:?}", err);
    }

    let context = HashMap::from([
        ("userId".to_owned(), "user-123".into()),
        ("country".to_owned(), "nl".into()),
    ]);

    let feature_key = std::env::var("FEATUREVISOR_FEATURE").unwrap_or_else(|_| "checkout".into());

    let evaluation = client.evaluate_flag(&feature_key, &context);
    println!("Enabled: {:?} ({})", evaluation.enabled, evaluation.reason);

    let variation = client.activate(&feature_key, &context);
    println!("Variation: {:?}", variation);

    Ok(())
}
