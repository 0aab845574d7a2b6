pub const TOPIC_CONTROLLER_STATE: &str = "lamp/controller/state";

pub const TOPIC_CMD_POWER: &str = "lamp/cmnd/power";

pub const TOPIC_SENSOR_TEMPERATURE: &str = "lamp/sensor/temperature";

pub fn sensor_temperature_topic(location: &str) -> String {
    format!("{TOPIC_SENSOR_TEMPERATURE}/{location}")
}
