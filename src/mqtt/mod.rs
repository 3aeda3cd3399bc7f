//! # IoT Ignite MQTT Integration
//!
//! Bridges a device's sensors and actuators to the IoT Ignite platform over one
//! authenticated TLS session to the platform broker.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Client tuning options and broker defaults
//! ├── error.rs            - Connection, publish and serialization errors
//! ├── payload.rs          - Wire schema (inventory, presence, sensor data)
//! ├── publisher.rs        - Topic scheme and outbound message building
//! ├── message_manager.rs  - Inbound command/message classification and listeners
//! └── mqtt_handler.rs     - Session lifecycle, status and acknowledged publishing
//! ```
//!
//! ## Protocol
//!
//! - The node's inventory and presence are announced once per session, before
//!   any sensor data, to `{clientId}/publish/DeviceProfile/Status/...`.
//! - Sensor data goes to `{clientId}/publish/DeviceProfile/{nodeId}/{topic}`.
//! - Every publish is exactly-once and retained.
//! - Inbound traffic carrying `message":"On"` / `message":"Off"` is an actuator
//!   command; everything else is handed to message listeners as is.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ignite_connector::mqtt::{DataType, IgniteClient, Sensor};
//! use ignite_connector::mqtt::config::{DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IgniteClient::new("my-client", "my-node");
//! client.register_command_listener(|on| println!("switch -> {on}"));
//!
//! client
//!     .connect("user", "secret", DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT)
//!     .await?;
//! client
//!     .publish_inventory(&[Sensor::new("Temp", DataType::Float, "Temperature", "Acme")])
//!     .await?;
//! client
//!     .publish_numeric("Temp", &chrono::Utc::now(), &[21.5])
//!     .await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod payload;
pub mod publisher;

pub use config::ClientOptions;
pub use error::{ConnectResultCode, ConnectionError, PublishError, SerializationError};
pub use message_manager::{Inbound, MsgManager, ReceivedMessage};
pub use mqtt_handler::{ConnectionState, ConnectionStatus, IgniteClient};
pub use payload::{DataType, Sensor};
