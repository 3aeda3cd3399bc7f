use std::time::Duration;

pub const DEFAULT_BROKER_HOST: &str = "mqtt.ardich.com";
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Tuning knobs of an [`IgniteClient`](super::mqtt_handler::IgniteClient)
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub keep_alive: Duration,
    /// Upper bound for the TLS handshake plus CONNACK
    pub connect_timeout: Duration,
    /// Upper bound for the broker to complete a QoS 2 delivery
    pub publish_timeout: Duration,
    /// Capacity of the request channel towards the event loop
    pub request_capacity: usize,
    /// Topic filters subscribed on every successful connect
    pub subscriptions: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(30),
            request_capacity: 10,
            subscriptions: Vec::new(),
        }
    }
}
