use std::{path::Path, time::Duration};

use anyhow::Context;
use lamp_common::{sensor_temperature_topic, RuntimeConfig, SensorConfig};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{monitor::Monitor, w1};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = RuntimeConfig::default().with_overrides(|key| std::env::var(key).ok());
    runtime.sanitize();
    let sensor = runtime.sensor;

    match w1::list_sensors(Path::new(&sensor.w1_dir)).await {
        Ok(ids) => {
            for id in ids {
                info!("found sensor {id:?}");
            }
        }
        Err(err) => warn!("{err}"),
    }

    let mut mqtt_options = MqttOptions::new(
        "lamp-sensor",
        runtime.mqtt.host.clone(),
        runtime.mqtt.port,
    );
    if !runtime.mqtt.user.is_empty() {
        mqtt_options.set_credentials(runtime.mqtt.user.clone(), runtime.mqtt.pass.clone());
    }
    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    let poller = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("mqtt connected"),
                Ok(_) => {}
                Err(err) => {
                    warn!("sensor mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let monitor = Monitor::new(sensor.w1_dir.clone());
    let mut sample = tokio::time::interval(Duration::from_millis(sensor.sample_interval_ms));
    sample.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut upload = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_millis(sensor.upload_interval_ms),
        Duration::from_millis(sensor.upload_interval_ms),
    );
    upload.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(dir = %sensor.w1_dir, "monitor started");
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = sample.tick() => monitor.update().await,
            _ = upload.tick() => upload_values(&mqtt, &monitor, &sensor).await,
        }
    }

    info!("monitor shut down");
    if let Err(err) = mqtt.disconnect().await {
        warn!("mqtt disconnect failed: {err}");
    }
    poller.abort();
    Ok(())
}

async fn upload_values(mqtt: &AsyncClient, monitor: &Monitor, sensor: &SensorConfig) {
    for (id, location) in &sensor.locations {
        let Some(celsius) = monitor.value(id).await else {
            warn!(sensor = %id, location = %location, "no reading to upload");
            continue;
        };

        if let Err(err) = mqtt
            .publish(
                sensor_temperature_topic(location),
                QoS::AtLeastOnce,
                true,
                format!("{celsius:.1}"),
            )
            .await
        {
            warn!(location = %location, "temperature publish failed: {err}");
        }
    }
}
