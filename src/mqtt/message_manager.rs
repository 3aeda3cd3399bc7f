//! Inbound message classification and listener dispatch.
//!
//! Every inbound publish is decoded as UTF-8 text and classified by substring:
//!
//! ```text
//! contains `message":"On"`   -> command listeners (true)
//! contains `message":"Off"`  -> command listeners (false)
//! anything else              -> message listeners (ReceivedMessage)
//! ```
//!
//! The match is textual, not a JSON parse. A generic message whose body happens
//! to contain one of the markers (nested JSON, free text) is classified as a
//! command. The platform's actuator commands depend on this exact heuristic.

use chrono::NaiveDateTime;
use rumqttc::QoS;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const COMMAND_ON: &str = "message\":\"On\"";
const COMMAND_OFF: &str = "message\":\"Off\"";

/// An inbound message that is not an actuator command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(32).collect();
        write!(
            f,
            "{} - {} [{}]: {}",
            self.timestamp,
            self.topic,
            self.qos_name(),
            preview
        )
    }
}

impl ReceivedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS, retain: bool) -> Self {
        ReceivedMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// QoS level by name, as the platform's tooling prints it
    pub fn qos_name(&self) -> &'static str {
        match self.qos {
            QoS::AtMostOnce => "AtMostOnce",
            QoS::AtLeastOnce => "AtLeastOnce",
            QoS::ExactlyOnce => "ExactlyOnce",
        }
    }
}

/// Result of classifying one inbound publish
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Command(bool),
    Message(ReceivedMessage),
}

/// Applies the command heuristic to a raw inbound publish.
///
/// "On" is checked before "Off"; a payload carrying both is an On command.
pub fn classify(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Inbound {
    let text = String::from_utf8_lossy(payload);
    if text.contains(COMMAND_ON) {
        Inbound::Command(true)
    } else if text.contains(COMMAND_OFF) {
        Inbound::Command(false)
    } else {
        Inbound::Message(ReceivedMessage::new(topic, text.into_owned(), qos, retain))
    }
}

pub type CommandListener = Arc<dyn Fn(bool) + Send + Sync>;
pub type MessageListener = Arc<dyn Fn(&ReceivedMessage) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    commands: Vec<CommandListener>,
    messages: Vec<MessageListener>,
}

/// Listener registry shared between the client and its event loop.
///
/// Listeners fire in registration order, all of them, on the event loop task.
/// Invocations are not serialized against publishes; listeners must be safe to
/// call from another task. Deliveries with no listener are dropped.
#[derive(Clone, Default)]
pub struct MsgManager {
    listeners: Arc<RwLock<Listeners>>,
}

impl fmt::Debug for MsgManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MsgManager")
            .field("command_listeners", &listeners.commands.len())
            .field("message_listeners", &listeners.messages.len())
            .finish()
    }
}

impl MsgManager {
    pub fn register_command_listener(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .push(Arc::new(listener));
    }

    pub fn register_message_listener(
        &self,
        listener: impl Fn(&ReceivedMessage) + Send + Sync + 'static,
    ) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .push(Arc::new(listener));
    }

    /// Registers a listener that forwards commands into a channel.
    pub fn command_channel(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_command_listener(move |command| {
            if tx.send(command).is_err() {
                debug!("Command receiver dropped, discarding command");
            }
        });
        rx
    }

    /// Registers a listener that forwards generic messages into a channel.
    pub fn message_channel(&self) -> mpsc::UnboundedReceiver<ReceivedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_message_listener(move |msg| {
            if tx.send(msg.clone()).is_err() {
                debug!("Message receiver dropped, discarding message");
            }
        });
        rx
    }

    /// Classifies one inbound publish and fires the matching listeners.
    pub fn dispatch(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Inbound {
        let inbound = classify(topic, payload, qos, retain);

        // Snapshot so listeners may register further listeners without deadlocking.
        let (commands, messages) = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            (listeners.commands.clone(), listeners.messages.clone())
        };

        match &inbound {
            Inbound::Command(command) => {
                debug!(topic, command, "Received actuator command");
                if commands.is_empty() {
                    warn!(topic, "Command received but no command listener registered");
                }
                for listener in &commands {
                    listener(*command);
                }
            }
            Inbound::Message(msg) => {
                debug!(topic, payload_size = payload.len(), "Received message");
                for listener in &messages {
                    listener(msg);
                }
            }
        }
        inbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn on_and_off_are_commands() {
        assert_eq!(
            classify("t", br#"{"message":"On"}"#, QoS::ExactlyOnce, false),
            Inbound::Command(true)
        );
        assert_eq!(
            classify("t", br#"{"message":"Off"}"#, QoS::ExactlyOnce, false),
            Inbound::Command(false)
        );
    }

    #[test]
    fn on_wins_when_both_markers_present() {
        let payload = br#"{"a":{"message":"Off"},"b":{"message":"On"}}"#;
        assert_eq!(
            classify("t", payload, QoS::AtMostOnce, false),
            Inbound::Command(true)
        );
    }

    #[test]
    fn other_payloads_are_generic_messages() {
        for payload in [
            &br#"{"value":42}"#[..],
            &br#"{"message":"on"}"#[..],
            &b"plain text"[..],
        ] {
            match classify("a/b", payload, QoS::AtLeastOnce, true) {
                Inbound::Message(msg) => {
                    assert_eq!(msg.topic, "a/b");
                    assert_eq!(msg.payload.as_bytes(), payload);
                    assert_eq!(msg.qos, QoS::AtLeastOnce);
                    assert!(msg.retain);
                }
                other => panic!("expected a generic message, got {:?}", other),
            }
        }
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        match classify("t", &[0xff, b'o', b'k'], QoS::AtMostOnce, false) {
            Inbound::Message(msg) => assert_eq!(msg.payload, "\u{fffd}ok"),
            other => panic!("expected a generic message, got {:?}", other),
        }
    }

    #[test]
    fn display_names_qos_and_truncates_payload() {
        let msg = ReceivedMessage::new("X/N/Level", "a".repeat(40), QoS::ExactlyOnce, false);
        let line = msg.to_string();
        assert!(line.ends_with(&format!("X/N/Level [ExactlyOnce]: {}", "a".repeat(32))));

        let msg = ReceivedMessage::new("t", "", QoS::AtLeastOnce, false);
        assert_eq!(msg.qos_name(), "AtLeastOnce");
        assert!(msg.to_string().ends_with("t [AtLeastOnce]: "));
    }

    #[test]
    fn exactly_one_channel_fires() {
        let manager = MsgManager::default();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let messages = Arc::new(Mutex::new(Vec::new()));

        let sink = commands.clone();
        manager.register_command_listener(move |c| sink.lock().unwrap().push(c));
        let sink = messages.clone();
        manager.register_message_listener(move |m| sink.lock().unwrap().push(m.topic.clone()));

        manager.dispatch("cmd", br#"{"message":"On"}"#, QoS::ExactlyOnce, false);
        manager.dispatch("data", br#"{"temp":1}"#, QoS::ExactlyOnce, false);
        manager.dispatch("cmd", br#"{"message":"Off"}"#, QoS::ExactlyOnce, false);

        assert_eq!(*commands.lock().unwrap(), vec![true, false]);
        assert_eq!(*messages.lock().unwrap(), vec!["data".to_string()]);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let manager = MsgManager::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            manager.register_command_listener(move |_| order.lock().unwrap().push(id));
        }

        manager.dispatch("cmd", br#"{"message":"On"}"#, QoS::ExactlyOnce, false);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unregistered_deliveries_are_dropped() {
        let manager = MsgManager::default();
        let inbound = manager.dispatch("x", b"hello", QoS::AtMostOnce, false);
        assert!(matches!(inbound, Inbound::Message(_)));
    }

    #[tokio::test]
    async fn channel_adapters_forward_deliveries() {
        let manager = MsgManager::default();
        let mut commands = manager.command_channel();
        let mut messages = manager.message_channel();

        manager.dispatch("cmd", br#"{"message":"Off"}"#, QoS::ExactlyOnce, false);
        manager.dispatch("data", b"{}", QoS::ExactlyOnce, true);

        assert_eq!(commands.recv().await, Some(false));
        let msg = messages.recv().await.unwrap();
        assert_eq!(msg.topic, "data");
        assert!(msg.retain);
    }
}
