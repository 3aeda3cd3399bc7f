use color_eyre::{eyre::eyre, Result};
use ignite_connector::config::ConnectorConfig;
use ignite_connector::mqtt::{DataType, IgniteClient, Sensor};
use ignite_connector::sampler::{RandomSource, Sampler};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => ConnectorConfig::default_path()?,
    };
    let config = ConnectorConfig::load(&path).await?;

    let client = IgniteClient::with_options(
        config.client_id.clone(),
        config.node_id.clone(),
        config.client_options(),
    );
    client.register_command_listener(|command| info!("Received command {}", command));
    client.register_message_listener(|msg| info!("Received message {}", msg));

    if let Err(e) = client
        .connect(
            &config.username,
            &config.password,
            &config.broker_host,
            config.broker_port,
        )
        .await
    {
        error!("Did you set the MQTT credentials in {}?", path.display());
        return Err(eyre!("Connection failed ({:?}): {}", e.result_code(), e));
    }
    info!("ConnectionResult: {:?}", client.status().last_result);

    // Needed once per session before any data shows up on the platform
    let sensors = vec![
        Sensor::new(&config.status_topic, DataType::String, "Status", &config.vendor),
        Sensor::new(&config.numeric_topic, DataType::Float, "Sensor Value", &config.vendor),
        Sensor::actuator(&config.actuator_topic, DataType::Integer, "Actuator", &config.vendor),
    ];
    client.publish_inventory(&sensors).await?;

    let sampler = Sampler::new(
        client.clone(),
        config.numeric_topic.clone(),
        config.sample_interval(),
        RandomSource,
    );
    let sampler_handle = tokio::spawn(sampler.run());

    println!("Press [Enter] without text to exit.");
    println!(
        "Type text and press [Enter] to send a status message to the '{}' topic.",
        config.status_topic
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }
        if let Err(e) = client
            .publish_status(&config.status_topic, &chrono::Utc::now(), &line)
            .await
        {
            error!("Failed to send status: {}", e);
        }
    }

    client.disconnect().await;
    match sampler_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Sampler ended with error: {}", e),
        Err(e) => warn!("Sampler task failed: {}", e),
    }

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
