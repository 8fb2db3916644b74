//! Broker session owner and receive loop.
//!
//! The manager connects to the broker, subscribes to the configured topic as
//! soon as the connection is acknowledged, and feeds every inbound publish
//! through [`Applier::ingest`] sequentially, in delivery order. The loop ends
//! when the shutdown future resolves; a disconnect is then sent to the broker.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed -> Disconnecting -> Disconnected
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubAck, SubscribeReasonCode,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::applier::{Applier, IngestReport};
use crate::config::MqttConfig;
use crate::error::ConnectionError;

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 10;

/// Pause before the transport reconnects an established session.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long to keep polling for the disconnect packet to go out.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Disconnecting,
}

/// Inputs that move a [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectStarted,
    ConnectAccepted,
    ConnectFailed,
    SubscribeIssued,
    ConnectionLost,
    ShutdownRequested,
    DisconnectSent,
}

impl SessionState {
    /// Next state for `event`. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn on(self, event: SessionEvent) -> SessionState {
        // ---
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (_, E::ShutdownRequested) => S::Disconnecting,
            (S::Disconnecting, E::DisconnectSent) => S::Disconnected,
            (S::Disconnecting, _) => S::Disconnecting,
            (S::Disconnected, E::ConnectStarted) => S::Connecting,
            (S::Connecting, E::ConnectAccepted) => S::Connected,
            (S::Connected, E::SubscribeIssued) => S::Subscribed,
            (_, E::ConnectFailed) | (_, E::ConnectionLost) => S::Disconnected,
            (state, _) => state,
        }
    }
}

pub struct SubscriptionManager {
    config: MqttConfig,
    applier: Applier,
    state: SessionState,
}

impl SubscriptionManager {
    pub fn new(config: MqttConfig, applier: Applier) -> Self {
        Self {
            config,
            applier,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, event: SessionEvent) {
        // ---
        let next = self.state.on(event);
        if next != self.state {
            debug!(from = ?self.state, to = ?next, ?event, "Session state change");
            self.state = next;
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        // ---
        let mut opts = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker.clone(),
            self.config.port,
        );
        opts.set_keep_alive(self.config.keep_alive);
        opts.set_clean_session(true);
        opts
    }

    /// Decode one inbound message and run it through the ingestion pipeline.
    ///
    /// Every reading in the message shares one ingestion timestamp. Returns
    /// `None` when the payload is not UTF-8.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<IngestReport> {
        // ---
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(%topic, bytes = payload.len(), error = %e, "Dropping non UTF-8 message");
                return None;
            }
        };

        let observed_at = Utc::now();
        let report = self.applier.ingest(text, observed_at).await;

        info!(
            %topic,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            "Stored data for {} nodes",
            report.stored
        );
        Some(report)
    }

    /// Run the receive loop until `shutdown` resolves.
    ///
    /// A connection error before the first accepted session is returned after
    /// `connect_retries` extra attempts. Once a session has been accepted,
    /// dropped connections are logged and the transport reconnects.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ConnectionError>
    where
        F: Future<Output = ()>,
    {
        // ---
        tokio::pin!(shutdown);

        let broker = self.config.broker_addr();
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);

        let mut established = false;
        let mut attempt: u32 = 0;

        info!(%broker, client_id = %self.config.client_id, "Connecting to MQTT broker");
        self.transition(SessionEvent::ConnectStarted);

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Stopping MQTT listener...");
                    self.disconnect(&client, &mut eventloop).await;
                    return Ok(());
                }
                event = eventloop.poll() => event,
            };

            let failure = match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    match self.on_connack(&client, ack).await {
                        Ok(()) => {
                            established = true;
                            attempt = 0;
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    self.on_suback(&ack);
                    continue;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_message(&publish.topic, &publish.payload).await;
                    continue;
                }
                Ok(other) => {
                    trace!(event = ?other, "MQTT event");
                    continue;
                }
                Err(rumqttc::ConnectionError::ConnectionRefused(code)) => ConnectionError::Refused {
                    broker: broker.clone(),
                    code,
                },
                Err(source) => ConnectionError::Connect {
                    broker: broker.clone(),
                    source,
                },
            };

            let delay = if established {
                warn!(%broker, error = %failure, "Connection lost, reconnecting");
                self.transition(SessionEvent::ConnectionLost);
                RECONNECT_DELAY
            } else {
                self.transition(SessionEvent::ConnectFailed);
                attempt += 1;
                if attempt > self.config.connect_retries {
                    error!(%broker, error = %failure, "Connect failed");
                    return Err(failure);
                }
                let delay = self.config.retry_delay(attempt);
                warn!(
                    %broker,
                    error = %failure,
                    attempt,
                    max_attempts = self.config.connect_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Connect failed, retrying"
                );
                delay
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Stopping MQTT listener...");
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }
            self.transition(SessionEvent::ConnectStarted);
        }
    }

    async fn on_connack(
        &mut self,
        client: &AsyncClient,
        ack: ConnAck,
    ) -> Result<(), ConnectionError> {
        // ---
        if ack.code != ConnectReturnCode::Success {
            return Err(ConnectionError::Refused {
                broker: self.config.broker_addr(),
                code: ack.code,
            });
        }

        self.transition(SessionEvent::ConnectAccepted);
        info!(broker = %self.config.broker_addr(), "Connected to MQTT broker");

        client.subscribe(self.config.topic.clone(), QoS::AtMostOnce).await?;
        self.transition(SessionEvent::SubscribeIssued);
        info!(topic = %self.config.topic, "Subscribed → {}", self.config.topic);
        Ok(())
    }

    fn on_suback(&self, ack: &SubAck) {
        // ---
        for code in &ack.return_codes {
            match code {
                SubscribeReasonCode::Success(qos) => {
                    debug!(topic = %self.config.topic, ?qos, "Subscription acknowledged")
                }
                SubscribeReasonCode::Failure => {
                    error!(topic = %self.config.topic, "Broker rejected subscription")
                }
            }
        }
    }

    async fn disconnect(&mut self, client: &AsyncClient, eventloop: &mut EventLoop) {
        // ---
        let was_connected = matches!(
            self.state,
            SessionState::Connected | SessionState::Subscribed
        );
        self.transition(SessionEvent::ShutdownRequested);

        if was_connected {
            match client.try_disconnect() {
                Ok(()) => {
                    let flushed = timeout(DISCONNECT_FLUSH, async {
                        loop {
                            match eventloop.poll().await {
                                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                                Ok(Event::Incoming(Packet::Publish(p))) => debug!(
                                    topic = %p.topic,
                                    "Dropping message received during shutdown"
                                ),
                                Ok(_) => {}
                            }
                        }
                    })
                    .await;
                    if flushed.is_err() {
                        warn!("Timed out sending disconnect to broker");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to request disconnect"),
            }
        }

        self.transition(SessionEvent::DisconnectSent);
        info!("Disconnected from MQTT broker");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::WorkerPresence;
    use crate::store::{MemoryStore, NodeStore};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const TOPIC: &str = "subsecure/data";

    // MQTT 3.1.1 control packet types.
    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;
    const DISCONNECT: u8 = 14;

    fn test_config() -> MqttConfig {
        // ---
        MqttConfig {
            topic: "subsecure/data".to_string(),
            broker: "127.0.0.1".to_string(),
            port: 1,
            client_id: "test-client".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_retries: 0,
            retry_base: Duration::from_millis(10),
        }
    }

    fn manager() -> (Arc<MemoryStore>, SubscriptionManager) {
        // ---
        let store = Arc::new(MemoryStore::new());
        let applier = Applier::new(store.clone());
        (store, SubscriptionManager::new(test_config(), applier))
    }

    #[test]
    fn test_happy_path_transitions() {
        // ---
        use SessionEvent as E;

        let mut s = SessionState::Disconnected;
        let mut seen = vec![s];
        for e in [
            E::ConnectStarted,
            E::ConnectAccepted,
            E::SubscribeIssued,
            E::ShutdownRequested,
            E::DisconnectSent,
        ] {
            s = s.on(e);
            seen.push(s);
        }

        assert_eq!(
            seen,
            [
                SessionState::Disconnected,
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Subscribed,
                SessionState::Disconnecting,
                SessionState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_connect_failure_returns_to_disconnected() {
        // ---
        let s = SessionState::Disconnected.on(SessionEvent::ConnectStarted);
        assert_eq!(s.on(SessionEvent::ConnectFailed), SessionState::Disconnected);
        assert_eq!(
            SessionState::Subscribed.on(SessionEvent::ConnectionLost),
            SessionState::Disconnected
        );
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        // ---
        assert_eq!(
            SessionState::Disconnected.on(SessionEvent::SubscribeIssued),
            SessionState::Disconnected
        );
        assert_eq!(
            SessionState::Connecting.on(SessionEvent::SubscribeIssued),
            SessionState::Connecting
        );
        assert_eq!(
            SessionState::Disconnecting.on(SessionEvent::ConnectAccepted),
            SessionState::Disconnecting
        );
    }

    #[tokio::test]
    async fn test_handle_message_shares_one_timestamp() {
        // ---
        let (store, mgr) = manager();
        assert_eq!(mgr.state(), SessionState::Disconnected);

        let report = mgr
            .handle_message("subsecure/data", b"AAA25500101,BBB15600000,CCC20301511")
            .await
            .unwrap();

        assert_eq!(report.stored, 3);
        let history = store.list_history().await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| h.timestamp == history[0].timestamp));
    }

    #[tokio::test]
    async fn test_handle_message_rejects_invalid_utf8() {
        // ---
        let (store, mgr) = manager();
        assert!(mgr.handle_message("subsecure/data", &[0xff, 0xfe, 0x00]).await.is_none());
        assert!(store.list_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_when_first_connect_fails() {
        // ---
        // Port 1 on loopback refuses the connection.
        let (_store, mgr) = manager();
        let res = mgr.run(std::future::pending()).await;

        assert!(matches!(res, Err(ConnectionError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_during_backoff() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config();
        config.connect_retries = 5;
        config.retry_base = Duration::from_secs(10);
        let mgr = SubscriptionManager::new(config, Applier::new(store));

        let res = timeout(
            Duration::from_secs(5),
            mgr.run(sleep(Duration::from_millis(200))),
        )
        .await
        .expect("run should return once shutdown resolves");

        assert!(res.is_ok());
    }

    /// Read one control packet; returns its type and body.
    async fn read_packet(sock: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        // ---
        let header = sock.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = sock.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        sock.read_exact(&mut body).await?;
        Ok((header >> 4, body))
    }

    fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        // ---
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);

        let mut frame = vec![0x30, remaining as u8];
        frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Accept one client, acknowledge its CONNECT and its SUBSCRIBE to [`TOPIC`].
    async fn accept_session(listener: &TcpListener) -> TcpStream {
        // ---
        let (mut sock, _) = listener.accept().await.unwrap();

        let (kind, _) = read_packet(&mut sock).await.unwrap();
        assert_eq!(kind, CONNECT);
        sock.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let (kind, body) = read_packet(&mut sock).await.unwrap();
        assert_eq!(kind, SUBSCRIBE);
        let topic_len = usize::from(u16::from_be_bytes([body[2], body[3]]));
        assert_eq!(&body[4..4 + topic_len], TOPIC.as_bytes());
        sock.write_all(&[0x90, 0x03, body[0], body[1], 0x00]).await.unwrap();

        sock
    }

    /// True once a DISCONNECT arrives, false if the client just closes.
    async fn saw_disconnect(sock: &mut TcpStream) -> bool {
        // ---
        loop {
            match read_packet(sock).await {
                Ok((DISCONNECT, _)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    fn broker_config(port: u16) -> MqttConfig {
        MqttConfig {
            port,
            ..test_config()
        }
    }

    /// Resolves once `count` history rows exist.
    async fn history_reaches(store: Arc<MemoryStore>, count: usize) {
        // ---
        while store.list_history().await.unwrap().len() < count {
            sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_run_ingests_publish_and_disconnects_on_shutdown() {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let mut sock = accept_session(&listener).await;
            sock.write_all(&publish_frame(TOPIC, b"AAA25500101,BBB15600000"))
                .await
                .unwrap();
            saw_disconnect(&mut sock).await
        });

        let store = Arc::new(MemoryStore::new());
        let mgr = SubscriptionManager::new(broker_config(port), Applier::new(store.clone()));

        let res = timeout(
            Duration::from_secs(10),
            mgr.run(history_reaches(store.clone(), 2)),
        )
        .await
        .expect("run should return once both readings are stored");
        assert!(res.is_ok());

        let aaa = store.get_latest("AAA").await.unwrap().unwrap();
        assert_eq!((aaa.temperature, aaa.humidity, aaa.pm25), (25, 50, 1));
        let bbb = store.get_latest("BBB").await.unwrap().unwrap();
        assert_eq!(bbb.worker_presence, WorkerPresence::Absent);

        let disconnected = timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker should finish")
            .unwrap();
        assert!(disconnected, "expected a DISCONNECT packet after shutdown");
    }

    #[tokio::test]
    async fn test_run_resubscribes_after_connection_drop() {
        // ---
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            drop(accept_session(&listener).await);

            let mut sock = accept_session(&listener).await;
            sock.write_all(&publish_frame(TOPIC, b"N0130205610"))
                .await
                .unwrap();
            saw_disconnect(&mut sock).await
        });

        let store = Arc::new(MemoryStore::new());
        let mgr = SubscriptionManager::new(broker_config(port), Applier::new(store.clone()));

        let res = timeout(
            Duration::from_secs(10),
            mgr.run(history_reaches(store.clone(), 1)),
        )
        .await
        .expect("run should return once the reading is stored");
        assert!(res.is_ok());

        let n01 = store.get_latest("N01").await.unwrap().unwrap();
        assert_eq!(n01.temperature, 30);

        let disconnected = timeout(Duration::from_secs(5), broker)
            .await
            .expect("broker should finish")
            .unwrap();
        assert!(disconnected);
    }
}
