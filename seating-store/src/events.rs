use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use seating_core::{EventSink, SeatingError, SeatingResult};
use seating_shared::SeatingEvent;

/// Publishes seating events to Kafka, one topic per event kind.
#[derive(Clone)]
pub struct KafkaEventSink {
    producer: FutureProducer,
}

impl KafkaEventSink {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()> {
        let payload = serde_json::to_string(event).map_err(|e| SeatingError::Event(e.to_string()))?;
        let key = event.key();
        let topic = event.topic.as_str();

        let record = FutureRecord::to(topic).key(&key).payload(&payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(SeatingError::Event(e.to_string()))
            }
        }
    }
}

/// In-process fan-out for live seat-map streams.
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<SeatingEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeatingEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Delivers each event to every inner sink. A failing sink is logged and
/// does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn publish(&self, event: &SeatingEvent) -> SeatingResult<()> {
        let mut last_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                warn!(topic = %event.topic, "Event sink failed: {}", e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
