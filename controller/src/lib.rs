pub mod api;
pub mod clock;
pub mod gpio;
pub mod host;
pub mod inputs;
pub mod mqtt;
pub mod relay;
pub mod store;
pub mod timer;
pub mod worker;
