use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::IngestionMessage;
use std::time::Duration;

/// Delivery channel between the file parser and the batch consumer.
#[async_trait]
pub trait IngestionQueue: Send + Sync {
    async fn send(&self, message: &IngestionMessage) -> Result<()>;
}

pub struct KafkaIngestionQueue {
    producer: FutureProducer,
    topic: String,
}

impl KafkaIngestionQueue {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl IngestionQueue for KafkaIngestionQueue {
    async fn send(&self, message: &IngestionMessage) -> Result<()> {
        let json = message.to_json()?;
        let record = FutureRecord::<(), _>::to(&self.topic).payload(&json);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send message to {}: {}", self.topic, e))?;

        Ok(())
    }
}
