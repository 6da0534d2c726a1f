//! Pure message routing logic for MQTT events
//!
//! This module turns raw rumqttc events into routing decisions and owns the
//! subscription table that maps topic filters to inbound handlers.

use bytes::Bytes;
use rumqttc::v5::Event;
use std::borrow::Cow;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.clone(),
                    }),
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                        filters: suback.return_codes.len(),
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived(InboundMessage),
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed for a number of filters
    SubscriptionConfirmed { packet_id: u16, filters: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Match a topic name against an MQTT topic filter with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    // Wildcards never match topics starting with '$'
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Forwards inbound messages into an async consumer
#[derive(Debug, Clone)]
pub struct MessageForwarder {
    sender: mpsc::Sender<InboundMessage>,
}

impl MessageForwarder {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self { sender }
    }

    /// Forward message to the consumer, waiting for queue space
    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        self.sender
            .send(message)
            .await
            .map_err(|e| format!("Inbound consumer closed, dropped message on {}", e.0.topic))
    }
}

/// A topic filter bound to its handler
#[derive(Debug, Clone)]
pub struct TopicHandler {
    pub filter: String,
    pub forwarder: MessageForwarder,
}

/// Topic filter → handler table plus a fallback for unmatched topics
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    handlers: Vec<TopicHandler>,
    default_handler: Option<MessageForwarder>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic filter
    pub fn with_handler(mut self, filter: impl Into<String>, forwarder: MessageForwarder) -> Self {
        self.handlers.push(TopicHandler {
            filter: filter.into(),
            forwarder,
        });
        self
    }

    /// Register the handler for messages no filter claims
    pub fn with_default_handler(mut self, forwarder: MessageForwarder) -> Self {
        self.default_handler = Some(forwarder);
        self
    }

    /// Topic filters to subscribe on the broker
    pub fn filters(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.filter.clone()).collect()
    }

    pub fn has_default_handler(&self) -> bool {
        self.default_handler.is_some()
    }

    /// First matching filter handler, otherwise the default handler (pure function)
    pub fn resolve(&self, topic: &str) -> Option<&MessageForwarder> {
        self.handlers
            .iter()
            .find(|h| topic_matches(&h.filter, topic))
            .map(|h| &h.forwarder)
            .or(self.default_handler.as_ref())
    }

    /// Deliver a message to whichever handler claims its topic
    pub async fn dispatch(&self, message: InboundMessage) {
        debug!(topic = %message.topic, bytes = message.payload.len(), "Inbound MQTT message");

        match self.resolve(&message.topic) {
            Some(forwarder) => {
                if let Err(e) = forwarder.forward(message).await {
                    warn!("{}", e);
                }
            }
            None => {
                warn!(topic = %message.topic, "No handler for topic, message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::Publish;
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("danmaku/test", "danmaku/test"));
        assert!(!topic_matches("danmaku/test", "danmaku/other"));
        assert!(!topic_matches("danmaku/test", "danmaku/test/extra"));
        assert!(!topic_matches("danmaku/test/extra", "danmaku/test"));
    }

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches("danmaku/+", "danmaku/test"));
        assert!(!topic_matches("danmaku/+", "danmaku/test/extra"));
        assert!(topic_matches("danmaku/#", "danmaku/test/extra"));
        assert!(topic_matches("danmaku/#", "danmaku"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("+/+/temp", "room/1/temp"));
    }

    #[test]
    fn test_wildcards_skip_system_topics() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_route_mqtt_event() {
        use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect, Packet};

        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("danmaku/test"),
            pkid: 1,
            payload: Bytes::from("/model hello"),
            properties: None,
        }));

        if let EventRoute::MessageReceived(message) = MessageHandler::route_mqtt_event(&publish) {
            assert_eq!(message.topic, "danmaku/test");
            assert_eq!(message.text(), "/model hello");
        } else {
            panic!("Expected MessageReceived route");
        }
    }

    #[test]
    fn test_lossy_text_decoding() {
        let message = InboundMessage::new("t", vec![b'h', b'i', 0xff]);
        assert_eq!(message.text(), "hi\u{fffd}");
    }

    #[tokio::test]
    async fn test_specific_handler_wins_over_default() {
        let (specific_tx, mut specific_rx) = mpsc::channel(4);
        let (default_tx, mut default_rx) = mpsc::channel(4);
        let table = SubscriptionTable::new()
            .with_handler("danmaku/test", MessageForwarder::new(specific_tx))
            .with_default_handler(MessageForwarder::new(default_tx));

        table
            .dispatch(InboundMessage::new("danmaku/test", "first"))
            .await;
        table
            .dispatch(InboundMessage::new("other/topic", "second"))
            .await;

        assert_eq!(specific_rx.recv().await.unwrap().text(), "first");
        assert_eq!(default_rx.recv().await.unwrap().text(), "second");
        assert!(specific_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unmatched_without_default_is_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let table =
            SubscriptionTable::new().with_handler("danmaku/test", MessageForwarder::new(tx));

        assert!(table.resolve("other/topic").is_none());
        table.dispatch(InboundMessage::new("other/topic", "x")).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_filters_listing() {
        let (tx, _rx) = mpsc::channel(1);
        let table = SubscriptionTable::new()
            .with_handler("danmaku/test", MessageForwarder::new(tx.clone()))
            .with_default_handler(MessageForwarder::new(tx));
        assert_eq!(table.filters(), vec!["danmaku/test".to_string()]);
        assert!(table.has_default_handler());
    }
}
