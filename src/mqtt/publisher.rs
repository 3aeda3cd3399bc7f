//! Topic scheme and outbound message construction.
//!
//! Building a message is pure; handing it to the broker is the job of
//! [`IgniteClient`](super::mqtt_handler::IgniteClient). Every message carries the
//! platform's fixed delivery policy: exactly-once and retained.

use chrono::{DateTime, TimeZone};
use rumqttc::QoS;

use super::error::SerializationError;
use super::payload::{Inventory, JsonScalar, PresenceData, Sensor, SensorDataPackage};

/// Delivery guarantee of every outbound publish
pub const PUBLISH_QOS: QoS = QoS::ExactlyOnce;
/// Retain flag of every outbound publish
pub const PUBLISH_RETAIN: bool = true;

/// Topic names derived from the client and node identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    client_id: String,
    node_id: String,
}

impl Topics {
    pub fn new(client_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn inventory(&self) -> String {
        format!(
            "{}/publish/DeviceProfile/Status/DeviceNodeInventory",
            self.client_id
        )
    }

    pub fn presence(&self) -> String {
        format!(
            "{}/publish/DeviceProfile/Status/DeviceNodePresence",
            self.client_id
        )
    }

    /// Data topic of one sensor of this node
    pub fn data(&self, topic: &str) -> String {
        format!(
            "{}/publish/DeviceProfile/{}/{}",
            self.client_id, self.node_id, topic
        )
    }
}

/// A fully rendered message ready to be handed to the transport
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    fn new(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload: payload.into_bytes(),
            qos: PUBLISH_QOS,
            retain: PUBLISH_RETAIN,
        }
    }

    /// Payload as text, for logging and tests
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Builds the inventory and presence messages announcing `sensors`.
///
/// Returned in send order: inventory first, presence second.
pub fn inventory_messages(
    topics: &Topics,
    sensors: &[Sensor],
) -> Result<[OutboundMessage; 2], SerializationError> {
    let inventory = Inventory::new(topics.node_id(), sensors.iter().cloned()).to_json()?;
    let presence = PresenceData::all_connected(topics.node_id(), sensors).to_json()?;

    Ok([
        OutboundMessage::new(topics.inventory(), inventory),
        OutboundMessage::new(topics.presence(), presence),
    ])
}

/// Wraps `values` as a single-sample data package for `topic`.
pub fn values_message<T, Tz>(
    topics: &Topics,
    topic: &str,
    time: &DateTime<Tz>,
    values: impl IntoIterator<Item = T>,
) -> Result<OutboundMessage, SerializationError>
where
    T: JsonScalar,
    Tz: TimeZone,
{
    let payload = SensorDataPackage::single(time, values).to_json()?;
    Ok(OutboundMessage::new(topics.data(topic), payload))
}

pub fn status_message<Tz: TimeZone>(
    topics: &Topics,
    topic: &str,
    time: &DateTime<Tz>,
    status: &str,
) -> Result<OutboundMessage, SerializationError> {
    values_message(topics, topic, time, [status.to_string()])
}

pub fn numeric_message<Tz: TimeZone>(
    topics: &Topics,
    topic: &str,
    time: &DateTime<Tz>,
    values: &[f32],
) -> Result<OutboundMessage, SerializationError> {
    values_message(topics, topic, time, values.iter().copied())
}
