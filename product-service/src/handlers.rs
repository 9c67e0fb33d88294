use anyhow::Context;
use futures::{future, Stream, StreamExt};
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaResult;
use rdkafka::message::BorrowedMessage;
use shared::{IngestionMessage, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::batch::*;
use crate::models::CatalogEntry;
use crate::notify::{Notification, Notifier};
use crate::store::{writes_for, CatalogStore};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("message {message_id} has an unreadable body: {source}")]
    Decode {
        message_id: String,
        source: serde_json::Error,
    },

    #[error("message {message_id} is invalid: {source}")]
    Invalid {
        message_id: String,
        source: ValidationError,
    },

    #[error("transaction of {writes} writes failed: {cause:#}")]
    Store { writes: usize, cause: anyhow::Error },

    #[error("notification publish failed: {cause:#}")]
    Notify { cause: anyhow::Error },

    #[error("batch exceeded its {0:?} budget")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub product_ids: Vec<Uuid>,
}

/// Persists a batch of ingestion messages and announces completion:
/// received -> validated -> persisted -> notified.
pub struct CatalogBatchProcessor {
    store: Arc<dyn CatalogStore>,
    notifier: Arc<dyn Notifier>,
}

impl CatalogBatchProcessor {
    pub fn new(store: Arc<dyn CatalogStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn process_batch(&self, batch: &[QueueRecord]) -> Result<BatchReport, BatchError> {
        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let entries = batch
            .iter()
            .map(|record| -> Result<CatalogEntry, BatchError> {
                let message: IngestionMessage = serde_json::from_slice(&record.body)
                    .map_err(|source| BatchError::Decode {
                        message_id: record.message_id.clone(),
                        source,
                    })?;
                let item = message.validate().map_err(|source| BatchError::Invalid {
                    message_id: record.message_id.clone(),
                    source,
                })?;
                Ok(CatalogEntry::generate(item))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let product_ids: Vec<Uuid> = entries.iter().map(|entry| entry.product.id).collect();
        let writes = writes_for(entries);
        let write_count = writes.len();

        self.store
            .transact_write(writes)
            .await
            .map_err(|cause| BatchError::Store { writes: write_count, cause })?;
        info!("Persisted {} products in one transaction ({} writes)", product_ids.len(), write_count);

        let notification = Notification::products_created(product_ids.len());
        self.notifier
            .publish(&notification)
            .await
            .map_err(|cause| BatchError::Notify { cause })?;

        Ok(BatchReport { product_ids })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub batch_window: Duration,
    pub timeout: Duration,
    pub redelivery_delay: Duration,
}

/// Drains the ingestion topic in batches. Offsets are committed only after a
/// batch is processed (or dead-lettered); a failed batch is rewound so it is
/// delivered again. If a rewind fails the loop stops, so nothing past the
/// failed batch is ever committed.
pub struct BatchConsumer {
    processor: CatalogBatchProcessor,
    settings: BatchSettings,
    policy: RedrivePolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl BatchConsumer {
    pub fn new(
        processor: CatalogBatchProcessor,
        settings: BatchSettings,
        policy: RedrivePolicy,
        dead_letters: Option<Arc<dyn DeadLetterSink>>,
    ) -> Self {
        Self { processor, settings, policy, dead_letters }
    }

    pub async fn run(&self, consumer: StreamConsumer) -> anyhow::Result<()> {
        let records = consumer
            .stream()
            .map(queue_record)
            .filter_map(future::ready);
        futures::pin_mut!(records);

        self.drive(records, &consumer).await
    }

    pub async fn drive<S, O>(&self, mut records: S, offsets: &O) -> anyhow::Result<()>
    where
        S: Stream<Item = QueueRecord> + Unpin,
        O: OffsetControl,
    {
        let mut tracker = ReceiveTracker::default();

        while let Some(mut batch) =
            next_batch(&mut records, self.settings.batch_size, self.settings.batch_window).await
        {
            tracker.observe_batch(&mut batch);
            info!("Received batch of {} message(s)", batch.len());

            let failure = match self.process_within_budget(&batch).await {
                Ok(report) => {
                    info!("Batch processed, created products {:?}", report.product_ids);
                    None
                }
                Err(e) => {
                    error!("Error processing messages: {}", e);
                    Some(e.to_string())
                }
            };

            match self.policy.disposition(failure.is_none(), &batch) {
                Disposition::Commit => commit(offsets, &batch, &mut tracker),
                Disposition::DeadLetter => {
                    let reason = failure.unwrap_or_default();
                    if self.dead_letter(&batch, &reason).await {
                        commit(offsets, &batch, &mut tracker);
                    } else {
                        self.redeliver(offsets, &batch).await?;
                    }
                }
                Disposition::Redeliver => self.redeliver(offsets, &batch).await?,
            }
            debug!("Tracking receive counts for {} message(s)", tracker.len());
        }

        Ok(())
    }

    /// Runs the processor under the invocation budget.
    pub async fn process_within_budget(&self, batch: &[QueueRecord]) -> Result<BatchReport, BatchError> {
        match tokio::time::timeout(self.settings.timeout, self.processor.process_batch(batch)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BatchError::Timeout(self.settings.timeout)),
        }
    }

    async fn dead_letter(&self, batch: &[QueueRecord], reason: &str) -> bool {
        let Some(dead_letters) = &self.dead_letters else {
            warn!("Batch reached the receive limit but no dead-letter topic is configured");
            return false;
        };

        match dead_letters.forward(batch, reason).await {
            Ok(()) => {
                warn!("Moved {} message(s) to {}", batch.len(), dead_letters.topic());
                true
            }
            Err(e) => {
                error!("Error dead-lettering batch: {:#}", e);
                false
            }
        }
    }

    async fn redeliver<O: OffsetControl>(&self, offsets: &O, batch: &[QueueRecord]) -> anyhow::Result<()> {
        offsets
            .rewind_batch(batch)
            .context("failed batch could not be rewound for redelivery")?;
        tokio::time::sleep(self.settings.redelivery_delay).await;
        Ok(())
    }
}

fn queue_record(message: KafkaResult<BorrowedMessage<'_>>) -> Option<QueueRecord> {
    match message {
        Ok(m) => Some(QueueRecord::from_message(&m)),
        Err(e) => {
            error!("Error receiving message: {}", e);
            None
        }
    }
}

/// A failed commit only means the batch may be seen again after a restart.
fn commit<O: OffsetControl>(offsets: &O, batch: &[QueueRecord], tracker: &mut ReceiveTracker) {
    if let Err(e) = offsets.commit_batch(batch) {
        error!("Error committing batch: {:#}", e);
    }
    tracker.release(batch);
}
