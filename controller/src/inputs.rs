use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    gpio::DigitalPin,
    relay::RelayController,
    worker::{shutdown_requested, Worker},
};

/// Reports low-to-high transitions. The first sample only seeds the
/// detector, so a switch already closed at startup does not count.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    previous: Option<bool>,
}

impl EdgeDetector {
    pub fn rising(&mut self, level: bool) -> bool {
        let rose = self.previous == Some(false) && level;
        self.previous = Some(level);
        rose
    }
}

/// Toggles the lamp each time the wall switch goes high.
pub fn spawn_switch(
    pin: Box<dyn DigitalPin>,
    relay: Arc<RelayController>,
    interval: Duration,
) -> Worker {
    Worker::spawn("switch", move |shutdown| {
        run_switch(pin, relay, interval, shutdown)
    })
}

/// Keeps the lamp on while the motion sensor reports presence.
pub fn spawn_motion(
    pin: Box<dyn DigitalPin>,
    relay: Arc<RelayController>,
    interval: Duration,
) -> Worker {
    Worker::spawn("motion", move |shutdown| {
        run_motion(pin, relay, interval, shutdown)
    })
}

async fn run_switch(
    mut pin: Box<dyn DigitalPin>,
    relay: Arc<RelayController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(line = pin.line(), "switch started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut edges = EdgeDetector::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let level = match pin.read() {
                    Ok(level) => level,
                    Err(err) => {
                        warn!("{err}");
                        continue;
                    }
                };
                if edges.rising(level) {
                    let on = relay.toggle().await;
                    info!(on, "switch pressed, lamp toggled");
                }
            }
        }
    }

    info!("switch shut down");
}

async fn run_motion(
    mut pin: Box<dyn DigitalPin>,
    relay: Arc<RelayController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(line = pin.line(), "motion sensor started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut edges = EdgeDetector::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let level = match pin.read() {
                    Ok(level) => level,
                    Err(err) => {
                        warn!("{err}");
                        continue;
                    }
                };
                if edges.rising(level) {
                    debug!("motion detected");
                }
                if level {
                    relay.set_on(true).await;
                }
            }
        }
    }

    info!("motion sensor shut down");
}
