use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::gpio::{DigitalPin, GpioError};

struct RelayState {
    pin: Box<dyn DigitalPin>,
    on: bool,
}

impl RelayState {
    // `on` only follows a write that succeeded.
    fn write(&mut self, on: bool) {
        match self.pin.write(on) {
            Ok(()) => self.on = on,
            Err(err) => warn!(line = self.pin.line(), "relay write failed: {err}"),
        }
    }
}

/// Sole owner of the relay line. Every trigger (switch, motion sensor,
/// remote command, timer) goes through here, and all of them serialize on
/// one lock.
pub struct RelayController {
    state: Mutex<RelayState>,
}

impl RelayController {
    /// Takes ownership of `pin` and adopts its current level.
    pub fn open(mut pin: Box<dyn DigitalPin>) -> Result<Self, GpioError> {
        let on = pin.read()?;
        info!(line = pin.line(), on, "relay opened");
        Ok(Self {
            state: Mutex::new(RelayState { pin, on }),
        })
    }

    pub async fn is_on(&self) -> bool {
        self.state.lock().await.on
    }

    /// Drives the relay to `on`, writing the line only when that changes
    /// anything. Returns the resulting state; a failed write is logged and
    /// leaves the state as it was.
    pub async fn set_on(&self, on: bool) -> bool {
        let mut state = self.state.lock().await;
        if state.on != on {
            state.write(on);
        }
        state.on
    }

    /// Flips the relay. Returns the resulting state.
    pub async fn toggle(&self) -> bool {
        let mut state = self.state.lock().await;
        let target = !state.on;
        state.write(target);
        state.on
    }
}
