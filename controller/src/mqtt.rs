use std::{sync::Arc, time::Duration};

use anyhow::Context;
use lamp_common::{
    ControllerStatePayload, MqttConfig, PowerCommand, TOPIC_CMD_POWER, TOPIC_CONTROLLER_STATE,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    relay::RelayController,
    worker::{shutdown_requested, Worker},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const CLIENT_ID: &str = "lamp-controller";

/// Broker connection: accepts power commands and publishes the lamp state.
pub struct MqttBridge {
    client: AsyncClient,
    events: Worker,
    publisher: Worker,
}

impl MqttBridge {
    pub async fn connect(
        config: &MqttConfig,
        relay: Arc<RelayController>,
        publish_interval: Duration,
    ) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(CLIENT_ID, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !config.user.is_empty() {
            options.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        client
            .subscribe(TOPIC_CMD_POWER, QoS::AtMostOnce)
            .await
            .context("failed to queue mqtt subscription")?;

        let events = {
            let client = client.clone();
            let relay = relay.clone();
            Worker::spawn("mqtt-events", move |shutdown| {
                run_event_loop(eventloop, client, relay, shutdown)
            })
        };
        let publisher = {
            let client = client.clone();
            Worker::spawn("mqtt-state", move |shutdown| {
                run_state_publisher(client, relay, publish_interval, shutdown)
            })
        };

        info!(host = %config.host, port = config.port, "mqtt bridge started");
        Ok(Self {
            client,
            events,
            publisher,
        })
    }

    pub async fn close(&self) {
        self.publisher.close().await;
        if let Err(err) = self.client.try_disconnect() {
            debug!("mqtt disconnect not sent: {err}");
        }
        self.events.close().await;
    }
}

/// Applies a power command and returns the resulting lamp state.
pub async fn apply_power_command(relay: &RelayController, command: PowerCommand) -> bool {
    match command {
        PowerCommand::On => relay.set_on(true).await,
        PowerCommand::Off => relay.set_on(false).await,
        PowerCommand::Toggle => relay.toggle().await,
    }
}

/// Returns the new lamp state when the message changed or confirmed it.
async fn handle_mqtt_message(
    relay: &RelayController,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<Option<bool>> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(None);
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    match topic {
        TOPIC_CMD_POWER => {
            let command = PowerCommand::parse(message)
                .with_context(|| format!("unknown power command {message:?}"))?;
            let on = apply_power_command(relay, command).await;
            info!(command = command.as_str(), on, "power command applied");
            Ok(Some(on))
        }
        _ => Ok(None),
    }
}

fn state_body(on: bool) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(&ControllerStatePayload { on }).context("state serialization failed")
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    relay: Arc<RelayController>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                match handle_mqtt_message(&relay, &message.topic, &message.payload).await {
                    Ok(Some(on)) => {
                        // The event loop drains the request queue, so it must
                        // never wait on it.
                        let published = state_body(on).and_then(|body| {
                            client
                                .try_publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                                .context("state publish failed")
                        });
                        if let Err(err) = published {
                            warn!("{err:#}");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!("mqtt message handling error: {err:#}"),
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected");
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
            }
        }
    }

    info!("mqtt event loop shut down");
}

async fn run_state_publisher(
    client: AsyncClient,
    relay: Arc<RelayController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        let body = match state_body(relay.is_on().await) {
            Ok(body) => body,
            Err(err) => {
                warn!("{err:#}");
                continue;
            }
        };
        if let Err(err) = client
            .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
            .await
        {
            warn!("controller state publish failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MemoryPin;

    fn relay(level: bool) -> (RelayController, MemoryPin) {
        let pin = MemoryPin::new(17, level);
        (RelayController::open(Box::new(pin.clone())).unwrap(), pin)
    }

    #[tokio::test]
    async fn power_commands_drive_relay() {
        let (relay, pin) = relay(false);

        assert!(apply_power_command(&relay, PowerCommand::On).await);
        assert!(apply_power_command(&relay, PowerCommand::On).await);
        assert!(!apply_power_command(&relay, PowerCommand::Toggle).await);
        assert!(!apply_power_command(&relay, PowerCommand::Off).await);
        assert_eq!(pin.writes(), 2);
    }

    #[tokio::test]
    async fn power_topic_accepts_loose_payloads() {
        let (relay, pin) = relay(false);

        let state = handle_mqtt_message(&relay, TOPIC_CMD_POWER, b" ON\n")
            .await
            .unwrap();
        assert_eq!(state, Some(true));
        assert!(pin.level());
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let (relay, pin) = relay(false);

        assert!(handle_mqtt_message(&relay, TOPIC_CMD_POWER, b"blink")
            .await
            .is_err());
        assert!(handle_mqtt_message(&relay, TOPIC_CMD_POWER, &[0xff, 0xfe])
            .await
            .is_err());
        assert_eq!(pin.writes(), 0);
    }

    #[tokio::test]
    async fn oversized_and_foreign_messages_are_ignored() {
        let (relay, pin) = relay(false);
        let oversized = vec![b'o'; MAX_MQTT_PAYLOAD_BYTES + 1];

        assert_eq!(
            handle_mqtt_message(&relay, TOPIC_CMD_POWER, &oversized)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            handle_mqtt_message(&relay, "lamp/other", b"on")
                .await
                .unwrap(),
            None
        );
        assert_eq!(pin.writes(), 0);
    }

    #[test]
    fn state_body_shape() {
        let body = state_body(true).unwrap();
        assert_eq!(body, br#"{"on":true}"#);
    }
}
