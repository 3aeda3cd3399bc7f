//! Broker session management for the IoT Ignite connector.
//!
//! [`IgniteClient`] owns one client identity and at most one live session.
//! Each `connect` opens a fresh TLS session with a fresh cancellation scope,
//! spawns the event loop that feeds the [`MsgManager`], and supersedes whatever
//! session and scope existed before. `disconnect` closes the session and
//! cancels its scope, which stops every background task bound to it.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──CONNACK ok──► Connected ──disconnect──► Disconnected
//!                               │                          │
//!                               └──refused / io / tls──► Failed      (connection lost ─► Disconnected)
//! ```
//!
//! Publishes wait for the broker's PUBCOMP. Outgoing publish packet ids are
//! reported by the event loop in request order, so a FIFO of waiters is matched
//! against `Outgoing::Publish(pkid)` and resolved on `PubComp(pkid)`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ClientOptions;
use super::error::{ConnectResultCode, ConnectionError, PublishError};
use super::message_manager::{MsgManager, ReceivedMessage};
use super::payload::{JsonScalar, Sensor};
use super::publisher::{self, OutboundMessage, Topics};

/// How long `disconnect` waits for the event loop to flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Snapshot of the client's connection, published over a watch channel
#[derive(Clone, Debug, Default)]
pub struct ConnectionStatus {
    pub connection_state: ConnectionState,
    /// Result of the most recent connect attempt
    pub last_result: Option<ConnectResultCode>,
    pub last_error: Option<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

/// Matches outstanding publishes with the broker's QoS 2 completions
#[derive(Default)]
struct AckTracker {
    queued: Mutex<VecDeque<oneshot::Sender<()>>>,
    in_flight: Mutex<HashMap<u16, oneshot::Sender<()>>>,
}

impl AckTracker {
    /// Registers a waiter for the next publish request handed to the event loop.
    fn enqueue(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(tx);
        rx
    }

    /// Drops the most recent waiter after its request failed to enqueue.
    fn cancel_last(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back();
    }

    /// The event loop wrote the oldest queued publish with `pkid`.
    fn assign(&self, pkid: u16) {
        let waiter = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match waiter {
            Some(tx) => {
                self.in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(pkid, tx);
            }
            None => warn!(pkid, "Outgoing publish without a waiting caller"),
        }
    }

    fn complete(&self, pkid: u16) {
        let waiter = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pkid);
        if let Some(tx) = waiter {
            let _ = tx.send(());
        }
    }

    /// Releases every waiter with an error
    fn fail_all(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Withdraws a queued waiter unless its request reached the event loop.
///
/// Created under `send_order`, so the waiter is always the last one queued.
struct PendingAck<'a> {
    acks: &'a AckTracker,
    armed: bool,
}

impl<'a> PendingAck<'a> {
    fn new(acks: &'a AckTracker) -> Self {
        Self { acks, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAck<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.acks.cancel_last();
        }
    }
}

/// One live broker session
struct Session {
    client: AsyncClient,
    /// Caller-facing scope, cancelled as soon as the session starts closing
    scope: CancellationToken,
    /// Stops the event loop when DISCONNECT was not flushed in time
    shutdown: CancellationToken,
    acks: AckTracker,
    /// Keeps waiter order identical to request order
    send_order: tokio::sync::Mutex<()>,
}

struct Inner {
    topics: Topics,
    options: ClientOptions,
    msg_manager: MsgManager,
    status: Arc<watch::Sender<ConnectionStatus>>,
    session: RwLock<Option<Arc<Session>>>,
    scope: Mutex<CancellationToken>,
    /// Serializes connect/disconnect and owns the event loop task
    lifecycle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Connector to the IoT Ignite platform for one client and node identity.
///
/// Cheap to clone; clones share the same session, listeners and status.
#[derive(Clone)]
pub struct IgniteClient {
    inner: Arc<Inner>,
}

impl IgniteClient {
    pub fn new(client_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::with_options(client_id, node_id, ClientOptions::default())
    }

    pub fn with_options(
        client_id: impl Into<String>,
        node_id: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());

        // No session yet: background work bound to the scope must not start.
        let scope = CancellationToken::new();
        scope.cancel();

        Self {
            inner: Arc::new(Inner {
                topics: Topics::new(client_id, node_id),
                options,
                msg_manager: MsgManager::default(),
                status: Arc::new(status),
                session: RwLock::new(None),
                scope: Mutex::new(scope),
                lifecycle: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn messages(&self) -> &MsgManager {
        &self.inner.msg_manager
    }

    pub fn register_command_listener(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.msg_manager.register_command_listener(listener);
    }

    pub fn register_message_listener(
        &self,
        listener: impl Fn(&ReceivedMessage) + Send + Sync + 'static,
    ) {
        self.inner.msg_manager.register_message_listener(listener);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Token cancelled when the current session ends or is superseded.
    ///
    /// Already cancelled if no session is active.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Opens a TLS session to `host:port` authenticated with the given credentials.
    ///
    /// Any existing session is closed first. On success the state becomes
    /// `Connected` and inbound dispatch is running; on failure the state becomes
    /// `Failed` and the error's result code is recorded. Nothing is retried.
    pub async fn connect(
        &self,
        username: &str,
        password: &str,
        host: &str,
        port: u16,
    ) -> Result<(), ConnectionError> {
        let mut event_loop_slot = self.inner.lifecycle.lock().await;
        self.teardown(&mut event_loop_slot).await;

        let scope = CancellationToken::new();
        {
            let mut current = self
                .inner
                .scope
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            *current = scope.clone();
        }

        self.inner.status.send_modify(|status| {
            status.connection_state = ConnectionState::Connecting;
        });
        info!(
            client_id = self.inner.topics.client_id(),
            host, port, "Connecting to IoT Ignite broker"
        );

        let options = &self.inner.options;
        let mut mqtt_options = MqttOptions::new(self.inner.topics.client_id(), host, port);
        mqtt_options
            .set_credentials(username, password)
            .set_keep_alive(options.keep_alive)
            .set_clean_session(true)
            .set_transport(Transport::tls_with_default_config());

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, options.request_capacity);

        let outcome = tokio::select! {
            _ = scope.cancelled() => Err(ConnectionError::Cancelled),
            result = tokio::time::timeout(options.connect_timeout, await_connack(&mut event_loop)) => {
                result.unwrap_or(Err(ConnectionError::Timeout))
            }
        };

        if let Err(err) = outcome {
            error!(error = %err, "Connection attempt failed");
            scope.cancel();
            self.record_failure(&err);
            return Err(err);
        }

        let session = Arc::new(Session {
            client,
            scope,
            shutdown: CancellationToken::new(),
            acks: AckTracker::default(),
            send_order: tokio::sync::Mutex::new(()),
        });

        *self.inner.session.write().await = Some(session.clone());
        self.inner.status.send_modify(|status| {
            status.connection_state = ConnectionState::Connected;
            status.last_result = Some(ConnectResultCode::Success);
            status.last_error = None;
            status.last_activity = Some(chrono::Local::now());
        });
        info!("Connected to IoT Ignite broker");

        // Spawned after the state change so an early loss is not overwritten.
        *event_loop_slot = Some(tokio::spawn(run_event_loop(
            event_loop,
            session.clone(),
            self.inner.msg_manager.clone(),
            self.inner.status.clone(),
        )));

        self.subscribe_filters(&session, &mut event_loop_slot).await
    }

    /// Requests the configured subscriptions for a fresh session.
    ///
    /// A failed request closes the session and is recorded as a failed connect.
    async fn subscribe_filters(
        &self,
        session: &Session,
        event_loop_slot: &mut Option<JoinHandle<()>>,
    ) -> Result<(), ConnectionError> {
        for filter in &self.inner.options.subscriptions {
            if let Err(e) = session.client.subscribe(filter.as_str(), QoS::ExactlyOnce).await {
                error!(filter = %filter, error = %e, "Subscription request failed");
                self.teardown(event_loop_slot).await;
                let err = ConnectionError::Transport(e.to_string());
                self.record_failure(&err);
                return Err(err);
            }
            debug!(filter = %filter, "Subscription requested");
        }
        Ok(())
    }

    fn record_failure(&self, err: &ConnectionError) {
        self.inner.status.send_modify(|status| {
            status.connection_state = ConnectionState::Failed;
            status.last_result = Some(err.result_code());
            status.last_error = Some(err.to_string());
        });
    }

    /// Closes the session and cancels its scope. A no-op when already disconnected.
    ///
    /// The state is `Disconnected` and the scope cancelled before the DISCONNECT
    /// packet is flushed. A connect still waiting for its CONNACK is cancelled.
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Connecting {
            self.inner
                .scope
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cancel();
        }
        let mut event_loop_slot = self.inner.lifecycle.lock().await;
        self.teardown(&mut event_loop_slot).await;
    }

    async fn teardown(&self, event_loop_slot: &mut Option<JoinHandle<()>>) {
        let session = self.inner.session.write().await.take();

        // Bound work must observe the end of the session before DISCONNECT is flushed.
        self.inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        if let Some(session) = &session {
            session.scope.cancel();
        }
        self.inner.status.send_if_modified(|status| {
            if status.connection_state == ConnectionState::Disconnected {
                return false;
            }
            status.connection_state = ConnectionState::Disconnected;
            true
        });

        if let Some(session) = &session {
            info!("Disconnecting from IoT Ignite broker");
            match tokio::time::timeout(DISCONNECT_GRACE, session.client.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Disconnect request could not be sent");
                    session.shutdown.cancel();
                }
                Err(_) => {
                    warn!("Request queue stayed full, dropping the session without DISCONNECT");
                    session.shutdown.cancel();
                }
            }
        }

        if let Some(mut handle) = event_loop_slot.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Event loop did not stop in time, aborting it");
                handle.abort();
            }
        }

        if let Some(session) = session {
            session.shutdown.cancel();
            session.acks.fail_all();
        }
    }

    /// Announces the node's things: inventory first, then presence.
    pub async fn publish_inventory(&self, sensors: &[Sensor]) -> Result<(), PublishError> {
        let session = self.live_session().await?;
        let [inventory, presence] = publisher::inventory_messages(&self.inner.topics, sensors)?;
        info!(sensors = sensors.len(), "Publishing node inventory");
        self.send(&session, inventory).await?;
        self.send(&session, presence).await
    }

    pub async fn publish_status<Tz: TimeZone>(
        &self,
        topic: &str,
        time: &DateTime<Tz>,
        status: &str,
    ) -> Result<(), PublishError> {
        let session = self.live_session().await?;
        let message = publisher::status_message(&self.inner.topics, topic, time, status)?;
        self.send(&session, message).await
    }

    pub async fn publish_numeric<Tz: TimeZone>(
        &self,
        topic: &str,
        time: &DateTime<Tz>,
        values: &[f32],
    ) -> Result<(), PublishError> {
        let session = self.live_session().await?;
        let message = publisher::numeric_message(&self.inner.topics, topic, time, values)?;
        self.send(&session, message).await
    }

    /// Publishes any JSON scalar series to the node's `topic`.
    pub async fn publish_values<T, Tz>(
        &self,
        topic: &str,
        time: &DateTime<Tz>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<(), PublishError>
    where
        T: JsonScalar,
        Tz: TimeZone,
    {
        let session = self.live_session().await?;
        let message = publisher::values_message(&self.inner.topics, topic, time, values)?;
        self.send(&session, message).await
    }

    async fn live_session(&self) -> Result<Arc<Session>, PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.inner
            .session
            .read()
            .await
            .clone()
            .ok_or(PublishError::NotConnected)
    }

    async fn send(&self, session: &Session, message: OutboundMessage) -> Result<(), PublishError> {
        let OutboundMessage {
            topic,
            payload,
            qos,
            retain,
        } = message;

        let ack = {
            let _order = session.send_order.lock().await;
            let ack = session.acks.enqueue();
            // Dropping this future while the request channel is full must not
            // leave a waiter behind for a request that was never sent.
            let pending = PendingAck::new(&session.acks);
            if let Err(e) = session.client.publish(topic.as_str(), qos, retain, payload).await {
                error!(topic = %topic, error = %e, "Failed to enqueue publish");
                return Err(e.into());
            }
            pending.disarm();
            ack
        };
        debug!(topic = %topic, "Publish enqueued, waiting for PUBCOMP");

        let result = tokio::select! {
            _ = session.scope.cancelled() => Err(PublishError::ConnectionLost),
            acked = tokio::time::timeout(self.inner.options.publish_timeout, ack) => match acked {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(PublishError::ConnectionLost),
                Err(_) => Err(PublishError::AckTimeout),
            },
        };

        match &result {
            Ok(()) => {
                debug!(topic = %topic, "Publish acknowledged");
                self.inner.status.send_modify(|status| {
                    status.messages_sent += 1;
                    status.last_activity = Some(chrono::Local::now());
                });
            }
            Err(e) => warn!(topic = %topic, error = %e, "Publish not acknowledged"),
        }
        result
    }
}

/// Polls until the broker answers the CONNECT.
async fn await_connack(event_loop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ConnectionError::from_return_code(ack.code))
                };
            }
            Ok(event) => debug!(?event, "Event before CONNACK"),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drives one session until it is cancelled, closed or fails.
///
/// Transport errors end the session; rumqttc would reconnect if polled again,
/// which is left to the caller.
async fn run_event_loop(
    mut event_loop: EventLoop,
    session: Arc<Session>,
    msg_manager: MsgManager,
    status: Arc<watch::Sender<ConnectionStatus>>,
) {
    loop {
        let event = tokio::select! {
            _ = session.shutdown.cancelled() => {
                debug!("Session shut down, stopping event loop");
                break;
            }
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                status.send_modify(|status| {
                    status.messages_received += 1;
                    status.last_activity = Some(chrono::Local::now());
                });
                msg_manager.dispatch(
                    &publish.topic,
                    &publish.payload,
                    publish.qos,
                    publish.retain,
                );
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => session.acks.assign(pkid),
            Ok(Event::Incoming(Packet::PubComp(comp))) => session.acks.complete(comp.pkid),
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, codes = ?ack.return_codes, "Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Sent DISCONNECT, stopping event loop");
                break;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                mark_lost(&session, &status, "broker closed the session".to_string());
                break;
            }
            Ok(event) => debug!(?event, "MQTT event"),
            Err(e) => {
                error!(error = %e, "MQTT event loop error, session ended");
                mark_lost(&session, &status, e.to_string());
                break;
            }
        }
    }
    session.acks.fail_all();
    info!("MQTT event loop terminated");
}

fn mark_lost(session: &Session, status: &watch::Sender<ConnectionStatus>, reason: String) {
    // A cancelled scope means teardown already owns the status.
    if session.scope.is_cancelled() {
        return;
    }
    session.scope.cancel();
    status.send_modify(|status| {
        status.connection_state = ConnectionState::Disconnected;
        status.last_error = Some(reason);
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A session marked `Connected` whose requests are queued but never written.
    pub(crate) struct OfflineSession {
        session: Arc<Session>,
        event_loop: Option<EventLoop>,
    }

    impl OfflineSession {
        /// Installs the session on `client`; its stand-in event loop stops after `flush`.
        pub(crate) async fn install(client: &IgniteClient, flush: Duration) -> Self {
            let mqtt_options = MqttOptions::new(client.topics().client_id(), "localhost", 1883);
            let (mqtt, event_loop) = AsyncClient::new(mqtt_options, 4);

            let scope = CancellationToken::new();
            {
                let mut current = client.inner.scope.lock().unwrap();
                current.cancel();
                *current = scope.clone();
            }
            let session = Arc::new(Session {
                client: mqtt,
                scope,
                shutdown: CancellationToken::new(),
                acks: AckTracker::default(),
                send_order: tokio::sync::Mutex::new(()),
            });
            *client.inner.session.write().await = Some(session.clone());
            client.inner.status.send_modify(|status| {
                status.connection_state = ConnectionState::Connected;
                status.last_result = Some(ConnectResultCode::Success);
            });
            *client.inner.lifecycle.lock().await = Some(tokio::spawn(tokio::time::sleep(flush)));

            Self {
                session,
                event_loop: Some(event_loop),
            }
        }

        pub(crate) fn session(&self) -> &Session {
            &self.session
        }

        /// Drops the receiving side, so every further request fails.
        pub(crate) fn close_requests(&mut self) {
            self.event_loop = None;
        }

        /// Waits until a publish is queued for acknowledgement.
        pub(crate) async fn wait_for_publish(&self) {
            while self
                .session
                .acks
                .queued
                .lock()
                .unwrap()
                .is_empty()
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        /// Acknowledges the oldest waiting publish as if the broker sent PUBCOMP.
        pub(crate) async fn complete_next(&self, pkid: u16) {
            self.wait_for_publish().await;
            self.session.acks.assign(pkid);
            self.session.acks.complete(pkid);
        }
    }
}
