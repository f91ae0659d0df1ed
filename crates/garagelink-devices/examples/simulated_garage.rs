use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use garagelink_core::config::{AccountConfig, Config, ConfigBuilder, PollingConfig};
use garagelink_core::logging;
use garagelink_devices::{Controller, DoorEvent, PollScheduler, RecordingHost, SimulatedCloud};

use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A fixed demo account; deployments use with_config_file and GARAGELINK__* variables
    let config = ConfigBuilder::new()
        .override_with(Config {
            account: AccountConfig {
                username: "demo@example.com".to_string(),
                password: "demo".to_string(),
                brand: "chamberlain".to_string(),
            },
            polling: PollingConfig {
                short_poll_secs: 2,
                long_poll_secs: 6,
                max_attempts: 2,
            },
            ..Config::default()
        })
        .build()
        .context("invalid configuration")?;

    logging::init_from_config(&config.logging)?;
    info!("Using brand {}", config.brand()?);

    let cloud = Arc::new(
        SimulatedCloud::new()
            .with_door("A1", "Left Door", "closed")
            .with_door("B2", "Right Door", "open"),
    );
    let host = Arc::new(RecordingHost::new());
    let controller = Arc::new(Controller::from_config(&config, cloud.clone(), host.clone())?);

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DoorEvent::Opened { id } => info!("{} opened", id),
                DoorEvent::Closed { id } => info!("{} closed", id),
                other => info!("event: {:?}", other),
            }
        }
    });

    let added = controller.start().await?;
    info!("Found {} doors", added);

    let polling = PollScheduler::from_config(controller.clone(), &config.polling).spawn();

    // Open the left door through the hub command path
    let outcome = controller.dispatch("A1", "DON").await;
    info!("DON on A1: {:?}", outcome);

    // The opener finishes its travel a little later
    sleep(Duration::from_secs(3)).await;
    cloud.set_state(&"A1".into(), Some("open"));

    // A flaky service: the first close attempt fails and is retried
    cloud.fail_commands(1);
    let outcome = controller.dispatch("B2", "DOF").await;
    info!("DOF on B2: {:?}", outcome);

    sleep(Duration::from_secs(3)).await;
    cloud.set_state(&"B2".into(), Some("closed"));
    sleep(Duration::from_secs(3)).await;

    polling.stop().await;
    controller.stop().await;

    for address in ["A1", "B2"] {
        info!("{} driver history: {:?}", address, host.driver_history(address));
    }

    Ok(())
}
