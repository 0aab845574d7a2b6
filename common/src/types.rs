use serde::{Deserialize, Serialize};

use crate::schedule::TimerSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    On,
    Off,
    Toggle,
}

impl PowerCommand {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Toggle => "toggle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampStatePayload {
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerTimesPayload {
    #[serde(rename = "turnOn", default)]
    pub turn_on: Vec<String>,
    #[serde(rename = "turnOff", default)]
    pub turn_off: Vec<String>,
}

impl From<TimerSchedule> for TimerTimesPayload {
    fn from(schedule: TimerSchedule) -> Self {
        Self {
            turn_on: schedule.turn_on_times,
            turn_off: schedule.turn_off_times,
        }
    }
}

impl From<TimerTimesPayload> for TimerSchedule {
    fn from(payload: TimerTimesPayload) -> Self {
        TimerSchedule::new(payload.turn_on, payload.turn_off)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextEventsPayload {
    #[serde(rename = "nextOn")]
    pub next_on: Option<i64>,
    #[serde(rename = "nextOff")]
    pub next_off: Option<i64>,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub on: bool,
    #[serde(rename = "turnOn")]
    pub turn_on: Vec<String>,
    #[serde(rename = "turnOff")]
    pub turn_off: Vec<String>,
    #[serde(rename = "nextOn")]
    pub next_on: Option<i64>,
    #[serde(rename = "nextOff")]
    pub next_off: Option<i64>,
    pub timezone: String,
    #[serde(rename = "nowEpoch")]
    pub now_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerStatePayload {
    pub on: bool,
}
