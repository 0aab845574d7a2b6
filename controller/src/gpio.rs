use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use lamp_common::PinConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to open gpio line {line}: {reason}")]
    Open { line: u32, reason: String },
    #[error("gpio line {line} read failed: {reason}")]
    Read { line: u32, reason: String },
    #[error("gpio line {line} write failed: {reason}")]
    Write { line: u32, reason: String },
}

/// A single digital line. `true` is a high level.
pub trait DigitalPin: Send {
    fn line(&self) -> u32;
    fn read(&mut self) -> Result<bool, GpioError>;
    fn write(&mut self, high: bool) -> Result<(), GpioError>;
}

pub struct Pins {
    pub relay: Box<dyn DigitalPin>,
    pub switch: Box<dyn DigitalPin>,
    pub motion: Box<dyn DigitalPin>,
}

#[cfg(feature = "gpio")]
pub fn open_pins(config: &PinConfig) -> Result<Pins, GpioError> {
    let mut chip = gpio_cdev::Chip::new(&config.chip).map_err(|err| GpioError::Open {
        line: config.relay,
        reason: format!("{}: {err}", config.chip),
    })?;

    Ok(Pins {
        relay: Box::new(cdev::CdevPin::output_preserving(&mut chip, config.relay)?),
        switch: Box::new(cdev::CdevPin::input(&mut chip, config.switch)?),
        motion: Box::new(cdev::CdevPin::input(&mut chip, config.motion)?),
    })
}

/// Without the `gpio` feature every line is simulated in memory.
#[cfg(not(feature = "gpio"))]
pub fn open_pins(config: &PinConfig) -> Result<Pins, GpioError> {
    tracing::warn!(
        chip = %config.chip,
        "built without the gpio feature, using simulated pins"
    );
    Ok(Pins {
        relay: Box::new(MemoryPin::new(config.relay, false)),
        switch: Box::new(MemoryPin::new(config.switch, false)),
        motion: Box::new(MemoryPin::new(config.motion, false)),
    })
}

#[derive(Debug, Default)]
struct MemoryLine {
    level: AtomicBool,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// In-memory line. Clones share the same level, so a test can drive an
/// input or observe an output through its own handle.
#[derive(Debug, Clone)]
pub struct MemoryPin {
    line: u32,
    state: Arc<MemoryLine>,
}

impl MemoryPin {
    pub fn new(line: u32, level: bool) -> Self {
        let state = MemoryLine::default();
        state.level.store(level, Ordering::SeqCst);
        Self {
            line,
            state: Arc::new(state),
        }
    }

    pub fn level(&self) -> bool {
        self.state.level.load(Ordering::SeqCst)
    }

    /// Drives the line from outside, as a switch or sensor would.
    pub fn set_level(&self, level: bool) {
        self.state.level.store(level, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DigitalPin for MemoryPin {
    fn line(&self) -> u32 {
        self.line
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(GpioError::Read {
                line: self.line,
                reason: "simulated failure".to_string(),
            });
        }
        Ok(self.level())
    }

    fn write(&mut self, high: bool) -> Result<(), GpioError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(GpioError::Write {
                line: self.line,
                reason: "simulated failure".to_string(),
            });
        }
        self.state.level.store(high, Ordering::SeqCst);
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(feature = "gpio")]
mod cdev {
    use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

    use super::{DigitalPin, GpioError};

    const CONSUMER: &str = "lamp-controller";

    pub struct CdevPin {
        line: u32,
        handle: LineHandle,
    }

    impl CdevPin {
        pub fn input(chip: &mut Chip, line: u32) -> Result<Self, GpioError> {
            let handle = request(chip, line, LineRequestFlags::INPUT, 0)?;
            Ok(Self { line, handle })
        }

        /// Requests `line` as an output driven at its current level, so a
        /// restart does not flip whatever the line is switching.
        pub fn output_preserving(chip: &mut Chip, line: u32) -> Result<Self, GpioError> {
            let current = {
                let probe = request(chip, line, LineRequestFlags::INPUT, 0)?;
                probe.get_value().map_err(|err| GpioError::Read {
                    line,
                    reason: err.to_string(),
                })?
            };
            let handle = request(chip, line, LineRequestFlags::OUTPUT, current)?;
            Ok(Self { line, handle })
        }
    }

    fn request(
        chip: &mut Chip,
        line: u32,
        flags: LineRequestFlags,
        default: u8,
    ) -> Result<LineHandle, GpioError> {
        chip.get_line(line)
            .and_then(|handle| handle.request(flags, default, CONSUMER))
            .map_err(|err| GpioError::Open {
                line,
                reason: err.to_string(),
            })
    }

    impl DigitalPin for CdevPin {
        fn line(&self) -> u32 {
            self.line
        }

        fn read(&mut self) -> Result<bool, GpioError> {
            self.handle
                .get_value()
                .map(|value| value != 0)
                .map_err(|err| GpioError::Read {
                    line: self.line,
                    reason: err.to_string(),
                })
        }

        fn write(&mut self, high: bool) -> Result<(), GpioError> {
            self.handle
                .set_value(u8::from(high))
                .map_err(|err| GpioError::Write {
                    line: self.line,
                    reason: err.to_string(),
                })
        }
    }
}
