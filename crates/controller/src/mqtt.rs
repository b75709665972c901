//! rumqttc implementation of [`Bridge`].
//!
//! The event loop is polled inline by the control loop rather than from a
//! spawned task, so inbound messages are only read between control steps.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Packet, QoS,
};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::bridge::{parse_topic, topic_for, Bridge, Feed, FeedMessage, TransportFault};
use crate::config::BrokerConfig;

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";

/// Request channel capacity between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 20;

pub struct MqttBridge {
    client: AsyncClient,
    eventloop: EventLoop,
    prefix: String,
    subscriptions: Vec<Feed>,
    /// Set on CONNACK, cleared on any connection error.
    connected: bool,
    poll_timeout: Duration,
    connect_timeout: Duration,
}

impl MqttBridge {
    pub fn new(cfg: &BrokerConfig) -> Self {
        let prefix = cfg.feed_prefix();

        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(cfg.keep_alive());
        if let Some(user) = &cfg.username {
            options.set_credentials(user.clone(), cfg.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            topic_for(&prefix, Feed::Status),
            PAYLOAD_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!(host = %cfg.host, port = cfg.port, prefix = %prefix, "mqtt bridge created");

        Self {
            client,
            eventloop,
            prefix,
            subscriptions: Vec::new(),
            connected: false,
            poll_timeout: cfg.poll_timeout(),
            connect_timeout: cfg.connect_timeout(),
        }
    }

    // `try_*` requests: the event loop is polled by the same task, so
    // awaiting a full request channel here would never return.

    fn send_subscribe(&self, feed: Feed) -> Result<(), TransportFault> {
        self.client
            .try_subscribe(topic_for(&self.prefix, feed), QoS::AtLeastOnce)
            .map_err(|e| TransportFault(format!("subscribe {feed}: {e}")))
    }

    fn announce_online(&self) -> Result<(), TransportFault> {
        self.client
            .try_publish(
                topic_for(&self.prefix, Feed::Status),
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE,
            )
            .map_err(|e| TransportFault(format!("publish status: {e}")))
    }

    /// Runs on every CONNACK, whichever call polled it. The broker starts a
    /// clean session each time, so every control feed is subscribed again.
    fn on_connected(&mut self) -> Result<(), TransportFault> {
        self.connected = true;
        self.announce_online()?;
        for &feed in &self.subscriptions {
            self.send_subscribe(feed)?;
        }
        debug!(feeds = self.subscriptions.len(), "subscriptions sent");
        Ok(())
    }

    fn connection_lost(&mut self, e: ConnectionError) -> TransportFault {
        self.connected = false;
        TransportFault(e.to_string())
    }

    /// Translate one event-loop event; `Some` only for publishes on known feeds.
    fn handle_event(&mut self, event: Event) -> Result<Option<FeedMessage>, TransportFault> {
        match event {
            Event::Incoming(Packet::Publish(p)) => {
                let Some(feed) = parse_topic(&self.prefix, &p.topic) else {
                    debug!(topic = %p.topic, "unhandled topic");
                    return Ok(None);
                };
                let payload = String::from_utf8_lossy(&p.payload).into_owned();
                Ok(Some(FeedMessage { feed, payload }))
            }
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("mqtt connected");
                self.on_connected()?;
                Ok(None)
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(pkid = ack.pkid, "subscription acknowledged");
                Ok(None)
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected = false;
                Err(TransportFault("broker sent disconnect".to_string()))
            }
            _ => Ok(None),
        }
    }
}

impl Bridge for MqttBridge {
    async fn subscribe(&mut self, feed: Feed) -> Result<(), TransportFault> {
        if self.subscriptions.contains(&feed) {
            return Ok(());
        }
        self.subscriptions.push(feed);
        // Before the first CONNACK the feed is only recorded; `on_connected`
        // sends it.
        if self.connected {
            self.send_subscribe(feed)?;
        }
        info!(feed = %feed, topic = %topic_for(&self.prefix, feed), "subscribed");
        Ok(())
    }

    async fn publish(&mut self, feed: Feed, payload: String) -> Result<(), TransportFault> {
        self.client
            .try_publish(topic_for(&self.prefix, feed), QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportFault(format!("publish {feed}: {e}")))
    }

    async fn service(&mut self) -> Result<Option<FeedMessage>, TransportFault> {
        let deadline = Instant::now() + self.poll_timeout;

        // Drain outgoing traffic and acks until a message arrives or the
        // budget for this step is spent.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match timeout(remaining, self.eventloop.poll()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(event)) => event,
                Ok(Err(e)) => return Err(self.connection_lost(e)),
            };
            if let Some(msg) = self.handle_event(event)? {
                return Ok(Some(msg));
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), TransportFault> {
        warn!("mqtt reconnecting");
        let deadline = Instant::now() + self.connect_timeout;

        // The event loop dials the broker on the next poll after an error.
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match timeout(remaining, self.eventloop.poll()).await {
                Err(_elapsed) => {
                    return Err(TransportFault("timed out waiting for CONNACK".to_string()))
                }
                Ok(Ok(event)) => event,
                Ok(Err(e)) => return Err(self.connection_lost(e)),
            };

            if let Event::Incoming(Packet::ConnAck(_)) = event {
                self.handle_event(event)?;
                break;
            }
        }

        info!("mqtt reconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, Request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn broker_config() -> BrokerConfig {
        BrokerConfig {
            username: Some("alice".into()),
            password: Some("secret".into()),
            ..BrokerConfig::default()
        }
    }

    fn connack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)))
    }

    fn incoming(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtLeastOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    /// Requests queued on the client so far, moved out of the event loop.
    fn queued(bridge: &mut MqttBridge) -> Vec<Request> {
        bridge.eventloop.clean();
        bridge.eventloop.pending.drain(..).collect()
    }

    fn subscribed_topics(requests: &[Request]) -> Vec<String> {
        requests
            .iter()
            .filter_map(|r| match r {
                Request::Subscribe(s) => Some(s.filters[0].path.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn publish_on_prefixed_feed_becomes_message() {
        let mut bridge = MqttBridge::new(&broker_config());
        let msg = bridge
            .handle_event(incoming("alice/feeds/pump", " 0 "))
            .unwrap()
            .expect("message for pump feed");
        assert_eq!(msg.feed, Feed::Pump);
        assert_eq!(msg.payload, " 0 ");
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let mut bridge = MqttBridge::new(&broker_config());
        for topic in ["alice/feeds/lamp", "bob/feeds/pump", "pump"] {
            assert!(bridge.handle_event(incoming(topic, "1")).unwrap().is_none());
        }
    }

    #[test]
    fn broker_disconnect_is_a_fault() {
        let mut bridge = MqttBridge::new(&broker_config());
        bridge.handle_event(connack()).unwrap();
        let err = bridge
            .handle_event(Event::Incoming(Packet::Disconnect))
            .unwrap_err();
        assert!(err.0.contains("disconnect"));
        assert!(!bridge.connected);
    }

    #[tokio::test]
    async fn every_connack_resubscribes_control_feeds() {
        let mut bridge = MqttBridge::new(&broker_config());
        for feed in Feed::CONTROL {
            bridge.subscribe(feed).await.unwrap();
        }
        // Not connected yet: nothing goes out until the first CONNACK.
        assert!(subscribed_topics(&queued(&mut bridge)).is_empty());

        for _session in 0..2 {
            bridge.handle_event(connack()).unwrap();
            let requests = queued(&mut bridge);
            assert_eq!(
                subscribed_topics(&requests),
                vec!["alice/feeds/pump", "alice/feeds/conversation", "alice/feeds/buzzer"]
            );
            let online = requests.iter().any(|r| {
                matches!(r, Request::Publish(p)
                    if p.topic == "alice/feeds/status" && p.retain && &p.payload[..] == b"online")
            });
            assert!(online, "status not announced");
        }
    }

    #[tokio::test]
    async fn subscribe_while_connected_is_sent_once() {
        let mut bridge = MqttBridge::new(&broker_config());
        bridge.handle_event(connack()).unwrap();
        queued(&mut bridge);

        bridge.subscribe(Feed::Pump).await.unwrap();
        bridge.subscribe(Feed::Pump).await.unwrap();
        assert_eq!(subscribed_topics(&queued(&mut bridge)), vec!["alice/feeds/pump"]);
    }

    // -- Against a local broker ---------------------------------------------

    /// Reads one MQTT packet; returns the first header byte.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<u8> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let b = stream.read_u8().await?;
            len |= usize::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok(header)
    }

    /// Accepts one client, acknowledges its CONNECT and waits for `want`
    /// SUBSCRIBE packets. The connection is dropped on return.
    async fn session_with_connack(listener: &TcpListener, want: usize) -> usize {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(read_packet(&mut stream).await.unwrap() & 0xf0, 0x10);
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let mut subscribes = 0;
        while subscribes < want {
            let header = read_packet(&mut stream).await.unwrap();
            if header & 0xf0 == 0x80 {
                subscribes += 1;
            }
        }
        subscribes
    }

    /// Accepts one client and hangs up before sending CONNACK.
    async fn session_without_connack(listener: &TcpListener) -> usize {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_packet(&mut stream).await.unwrap();
        0
    }

    /// Same failure handling as the control loop: one reconnect per fault.
    async fn step(bridge: &mut MqttBridge) {
        if bridge.service().await.is_err() {
            let _ = bridge.reconnect().await;
        }
    }

    #[tokio::test]
    async fn session_restored_by_service_resubscribes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let mut counts = Vec::new();
            counts.push(session_with_connack(&listener, 3).await);
            // reconnect() gets no CONNACK here, so the next service() call
            // is the one that dials the broker again.
            counts.push(session_without_connack(&listener).await);
            counts.push(session_with_connack(&listener, 3).await);
            counts
        });
        tokio::pin!(broker);

        let mut bridge = MqttBridge::new(&BrokerConfig {
            host: "127.0.0.1".into(),
            port,
            poll_timeout_ms: 50,
            connect_timeout_sec: 1,
            ..broker_config()
        });
        for feed in Feed::CONTROL {
            bridge.subscribe(feed).await.unwrap();
        }

        let counts = timeout(Duration::from_secs(10), async {
            loop {
                tokio::select! {
                    res = &mut broker => break res.unwrap(),
                    () = step(&mut bridge) => {}
                }
            }
        })
        .await
        .expect("control feeds not subscribed again after the session came back");

        assert_eq!(counts, vec![3, 0, 3]);
    }
}
