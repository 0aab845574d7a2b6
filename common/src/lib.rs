pub mod config;
pub mod schedule;
pub mod topics;
pub mod types;

pub use config::{ConfigError, MqttConfig, PinConfig, RuntimeConfig, SensorConfig};
pub use schedule::{
    ClockTime, ClockTimeError, InvalidEntry, LampAction, NextEvents, SchedulePlan, TimerSchedule,
};
pub use topics::*;
pub use types::{
    ControllerStatePayload, ControllerStatus, LampStatePayload, NextEventsPayload, PowerCommand,
    TimerTimesPayload,
};
