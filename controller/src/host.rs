use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use lamp_common::RuntimeConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    api::{self, ApiState},
    clock::{Clock, SystemClock},
    gpio,
    inputs,
    mqtt::MqttBridge,
    relay::RelayController,
    store::ScheduleStore,
    timer::Timer,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = RuntimeConfig::default().with_overrides(|key| std::env::var(key).ok());
    runtime.sanitize();
    let timezone = runtime
        .timezone()
        .with_context(|| format!("invalid timezone {:?}", runtime.timezone))?;

    let pins = gpio::open_pins(&runtime.pins)
        .with_context(|| format!("failed to open gpio lines on {}", runtime.pins.chip))?;
    let relay = Arc::new(RelayController::open(pins.relay).context("failed to open relay")?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = ScheduleStore::new(&runtime.data_dir);
    let timer = Arc::new(
        Timer::open(store, relay.clone(), timezone, clock.clone())
            .await
            .context("failed to load timer schedule")?,
    );

    let poll_interval = Duration::from_millis(runtime.pins.poll_interval_ms);
    let switch = inputs::spawn_switch(pins.switch, relay.clone(), poll_interval);
    let motion = inputs::spawn_motion(pins.motion, relay.clone(), poll_interval);

    let mqtt = if runtime.mqtt.enabled {
        let bridge = MqttBridge::connect(
            &runtime.mqtt,
            relay.clone(),
            Duration::from_millis(runtime.state_publish_interval_ms),
        )
        .await?;
        Some(bridge)
    } else {
        info!("MQTT_HOST not set, mqtt bridge disabled");
        None
    };

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = api::router(
        ApiState {
            relay: relay.clone(),
            timer: timer.clone(),
            clock,
        },
        web_root,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!(%timezone, "controller listening on http://{addr}");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down");
    if let Some(bridge) = &mqtt {
        bridge.close().await;
    }
    switch.close().await;
    motion.close().await;
    timer.close().await;
    info!(on = relay.is_on().await, "controller stopped");

    served.context("http server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
