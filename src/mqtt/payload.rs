//! # Payload Model
//!
//! Wire schema of the IoT Ignite platform. Every type here is a value object:
//! built in one go, rendered to its canonical JSON form and dropped.
//!
//! ```text
//! Inventory          {"data":[{"nodeId":..,"things":[Sensor, ..]}]}
//! PresenceData       {"data":[{"nodeId":..,"sensorId":..,"description":..,"connected":..}, ..]}
//! SensorDataPackage  {"data":{"sensorData":[{"date":<ms>,"values":[T, ..]}, ..]}}
//! ```
//!
//! Field names and ordering follow the platform exactly; struct fields are
//! declared in wire order because serde emits them in declaration order.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::error::SerializationError;

/// Data type of the values a sensor produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Integer,
    Float,
    String,
}

/// A sensor or actuator of a node.
///
/// `id` must be unique for both node and client; it is also the topic suffix
/// used when publishing the sensor's data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    id: String,
    #[serde(rename = "dataType")]
    data_type: DataType,
    vendor: String,
    actuator: bool,
    #[serde(rename = "type")]
    kind: String,
}

impl Sensor {
    /// Creates a plain (non-actuator) sensor. `kind` is the free-form category
    /// shown by the platform, e.g. "Temperature Sensor".
    pub fn new(
        id: impl Into<String>,
        data_type: DataType,
        kind: impl Into<String>,
        vendor: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            data_type,
            vendor: vendor.into(),
            actuator: false,
            kind: kind.into(),
        }
    }

    /// Creates a thing that accepts commands from the platform.
    pub fn actuator(
        id: impl Into<String>,
        data_type: DataType,
        kind: impl Into<String>,
        vendor: impl Into<String>,
    ) -> Self {
        Self {
            actuator: true,
            ..Self::new(id, data_type, kind, vendor)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn is_actuator(&self) -> bool {
        self.actuator
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

/// One device identity with its full set of things
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    #[serde(rename = "nodeId")]
    node_id: String,
    things: Vec<Sensor>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, sensors: impl IntoIterator<Item = Sensor>) -> Self {
        Self {
            node_id: node_id.into(),
            things: sensors.into_iter().collect(),
        }
    }
}

/// Capability announcement. Has to reach the platform at least once per
/// session before sensor data is displayed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Inventory {
    #[serde(rename = "data")]
    nodes: Vec<Node>,
}

impl Inventory {
    /// Builds the envelope for a single node.
    pub fn new(node_id: impl Into<String>, sensors: impl IntoIterator<Item = Sensor>) -> Self {
        Self {
            nodes: vec![Node::new(node_id, sensors)],
        }
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Liveness entry for one sensor
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InventoryItem {
    #[serde(rename = "nodeId")]
    node_id: String,
    #[serde(rename = "sensorId")]
    sensor_id: String,
    description: Option<String>,
    connected: i32,
}

impl InventoryItem {
    pub fn new(
        node_id: impl Into<String>,
        sensor_id: impl Into<String>,
        description: Option<String>,
        connected: i32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            sensor_id: sensor_id.into(),
            description,
            connected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PresenceData {
    data: Vec<InventoryItem>,
}

impl PresenceData {
    pub fn new(items: impl IntoIterator<Item = InventoryItem>) -> Self {
        Self {
            data: items.into_iter().collect(),
        }
    }

    /// Marks every sensor of `node_id` as connected, without description.
    pub fn all_connected<'a>(node_id: &str, sensors: impl IntoIterator<Item = &'a Sensor>) -> Self {
        Self::new(
            sensors
                .into_iter()
                .map(|sensor| InventoryItem::new(node_id, sensor.id(), None, 1)),
        )
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Values that have a plain JSON scalar representation.
///
/// Floating point implementations report non-finite values so a package never
/// silently turns NaN into `null`.
pub trait JsonScalar: Serialize {
    fn is_finite_scalar(&self) -> bool {
        true
    }
}

impl JsonScalar for String {}
impl JsonScalar for &str {}
impl JsonScalar for i32 {}
impl JsonScalar for i64 {}
impl JsonScalar for u32 {}
impl JsonScalar for u64 {}

impl JsonScalar for f32 {
    fn is_finite_scalar(&self) -> bool {
        self.is_finite()
    }
}

impl JsonScalar for f64 {
    fn is_finite_scalar(&self) -> bool {
        self.is_finite()
    }
}

/// A timestamped batch of values, one per measurement channel
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorDataValue<T> {
    date: i64,
    values: Vec<T>,
}

impl<T: JsonScalar> SensorDataValue<T> {
    /// Stamps the batch with `time` in UTC milliseconds since the epoch.
    pub fn new<Tz: TimeZone>(time: &DateTime<Tz>, values: impl IntoIterator<Item = T>) -> Self {
        Self::from_millis(time.timestamp_millis(), values)
    }

    pub fn from_millis(date: i64, values: impl IntoIterator<Item = T>) -> Self {
        Self {
            date,
            values: values.into_iter().collect(),
        }
    }

    pub fn date(&self) -> i64 {
        self.date
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct SensorDataPackageData<T> {
    #[serde(rename = "sensorData")]
    sensor_data: Vec<SensorDataValue<T>>,
}

/// Outbound envelope of a data publish
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorDataPackage<T> {
    data: SensorDataPackageData<T>,
}

impl<T: JsonScalar> SensorDataPackage<T> {
    pub fn new(samples: impl IntoIterator<Item = SensorDataValue<T>>) -> Self {
        Self {
            data: SensorDataPackageData {
                sensor_data: samples.into_iter().collect(),
            },
        }
    }

    /// Single-sample package, the shape every publish call uses.
    pub fn single<Tz: TimeZone>(time: &DateTime<Tz>, values: impl IntoIterator<Item = T>) -> Self {
        Self::new([SensorDataValue::new(time, values)])
    }

    /// Renders the canonical JSON form. Fails on non-finite values instead of
    /// coercing them.
    pub fn to_json(&self) -> Result<String, SerializationError> {
        let mut index = 0;
        for sample in &self.data.sensor_data {
            for value in &sample.values {
                if !value.is_finite_scalar() {
                    return Err(SerializationError::NonFiniteValue { index });
                }
                index += 1;
            }
        }
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sample_sensors() -> Vec<Sensor> {
        vec![
            Sensor::new("Status", DataType::String, "Status", "Acme"),
            Sensor::new("Level", DataType::Float, "Sensor Value", "Acme"),
            Sensor::actuator("Switch", DataType::Integer, "Actuator", "Acme"),
        ]
    }

    #[test]
    fn sensor_survives_json_round_trip() {
        for sensor in sample_sensors() {
            let text = serde_json::to_string(&sensor).unwrap();
            let back: Sensor = serde_json::from_str(&text).unwrap();
            assert_eq!(back.id(), sensor.id());
            assert_eq!(back.data_type(), sensor.data_type());
            assert_eq!(back.vendor(), sensor.vendor());
            assert_eq!(back.is_actuator(), sensor.is_actuator());
            assert_eq!(back.kind(), sensor.kind());
        }
    }

    #[test]
    fn sensor_fields_use_wire_names_and_order() {
        let sensor = Sensor::actuator("Switch", DataType::Integer, "Actuator", "Acme");
        assert_eq!(
            serde_json::to_string(&sensor).unwrap(),
            r#"{"id":"Switch","dataType":"INTEGER","vendor":"Acme","actuator":true,"type":"Actuator"}"#
        );
    }

    #[test]
    fn inventory_wraps_one_node() {
        let json = Inventory::new("Node1", sample_sensors()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["data"].as_array().unwrap().len(), 1);
        assert_eq!(value["data"][0]["nodeId"], "Node1");
        let things = value["data"][0]["things"].as_array().unwrap();
        assert_eq!(things.len(), 3);
        assert_eq!(things[1]["dataType"], "FLOAT");
        assert_eq!(things[2]["actuator"], true);
    }

    #[test]
    fn presence_marks_every_sensor_connected() {
        let sensors = sample_sensors();
        let json = PresenceData::all_connected("Node1", &sensors)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            value,
            json!({"data": [
                {"nodeId": "Node1", "sensorId": "Status", "description": null, "connected": 1},
                {"nodeId": "Node1", "sensorId": "Level", "description": null, "connected": 1},
                {"nodeId": "Node1", "sensorId": "Switch", "description": null, "connected": 1},
            ]})
        );
    }

    #[test]
    fn string_package_matches_wire_shape() {
        let time = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let json = SensorDataPackage::single(&time, ["hello".to_string()])
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"data":{"sensorData":[{"date":1700000000123,"values":["hello"]}]}}"#
        );
    }

    #[test]
    fn float_package_keeps_decimal_form() {
        let json = SensorDataPackage::new([SensorDataValue::from_millis(42, [1.0f32, 2.0])])
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"data":{"sensorData":[{"date":42,"values":[1.0,2.0]}]}}"#
        );
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let package = SensorDataPackage::new([
            SensorDataValue::from_millis(1, [1.0f64]),
            SensorDataValue::from_millis(2, [3.0, f64::NAN]),
        ]);
        match package.to_json() {
            Err(SerializationError::NonFiniteValue { index }) => assert_eq!(index, 2),
            other => panic!("expected NonFiniteValue, got {:?}", other),
        }
    }
}
