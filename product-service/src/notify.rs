use anyhow::Result;
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

pub const PRODUCTS_CREATED_SUBJECT: &str = "Products Created Successfully";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    pub count: usize,
}

impl Notification {
    pub fn products_created(count: usize) -> Self {
        Self {
            subject: PRODUCTS_CREATED_SUBJECT.to_string(),
            message: format!("Successfully processed and created {} products", count),
            count,
        }
    }
}

/// Fan-out channel for completion notifications. Subscribers are external.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<()>;
}

pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn publish(&self, notification: &Notification) -> Result<()> {
        let count = notification.count.to_string();
        let headers = OwnedHeaders::new()
            .insert(Header { key: "subject", value: Some(notification.subject.as_str()) })
            .insert(Header { key: "count", value: Some(count.as_str()) });

        let record = FutureRecord::<(), _>::to(&self.topic)
            .payload(&notification.message)
            .headers(headers);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish notification: {}", e))?;

        Ok(())
    }
}
