//! Telemetry connector for the IoT Ignite platform.
//!
//! ```text
//! Sensors ──► Sampler ──► IgniteClient ──TLS/MQTT──► Broker
//!                             ▲   │
//!            Command/Message  │   └──► MsgManager ──► listeners
//! ```

pub mod config;
pub mod mqtt;
pub mod sampler;

pub use config::ConnectorConfig;
pub use mqtt::{IgniteClient, Sensor};
pub use sampler::{RandomSource, SampleSource, Sampler};
