use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;
use crate::batch::{offset_ranges, DeadLetterSink, MessageKey, OffsetControl, QueueRecord};
use crate::models::{NewProduct, ProductView};
use crate::notify::{Notification, Notifier};
use crate::store::{CatalogStore, TransactWrite};

/// Catalog fake that records every committed transaction.
#[derive(Default)]
pub struct InMemoryCatalog {
    transactions: Mutex<Vec<Vec<TransactWrite>>>,
    fail_writes: bool,
    fail_reads: bool,
    stall_writes: bool,
}

impl InMemoryCatalog {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// A catalog whose transactions never complete.
    pub fn stalled() -> Self {
        Self {
            stall_writes: true,
            ..Self::default()
        }
    }

    pub fn unreadable() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn transactions(&self) -> Vec<Vec<TransactWrite>> {
        self.transactions.lock().unwrap().clone()
    }

    /// Inserts a product row with no stock row beside it.
    pub fn insert_product_only(&self, product: NewProduct) {
        self.transactions
            .lock()
            .unwrap()
            .push(vec![TransactWrite::PutProduct(product)]);
    }

    pub fn find(&self, id: Uuid) -> Option<ProductView> {
        self.views().into_iter().find(|view| view.id == id)
    }

    pub fn len(&self) -> usize {
        self.views().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn views(&self) -> Vec<ProductView> {
        let transactions = self.transactions.lock().unwrap();
        let mut products = Vec::new();
        let mut counts = HashMap::new();
        for write in transactions.iter().flatten() {
            match write {
                TransactWrite::PutProduct(product) => products.push(product.clone()),
                TransactWrite::PutStock(stock) => {
                    counts.insert(stock.product_id, stock.count);
                }
            }
        }

        products
            .into_iter()
            .map(|product| ProductView {
                count: counts.get(&product.id).copied().unwrap_or(0),
                id: product.id,
                title: product.title,
                description: product.description,
                price: product.price,
            })
            .collect()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> Result<()> {
        if self.stall_writes {
            std::future::pending::<()>().await;
        }
        if self.fail_writes {
            anyhow::bail!("TransactionCanceledException");
        }
        self.transactions.lock().unwrap().push(writes);
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductView>> {
        if self.fail_reads {
            anyhow::bail!("connection reset");
        }
        Ok(self.find(id))
    }

    async fn list_products(&self) -> Result<Vec<ProductView>> {
        if self.fail_reads {
            anyhow::bail!("connection reset");
        }
        Ok(self.views())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<Notification> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, notification: &Notification) -> Result<()> {
        if self.fail {
            anyhow::bail!("topic unavailable");
        }
        self.published.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Offset fake: commits record the next offset per partition, rewinds the
/// first offset of the batch.
#[derive(Default)]
pub struct RecordingOffsets {
    commits: Mutex<Vec<Vec<MessageKey>>>,
    rewinds: Mutex<Vec<Vec<MessageKey>>>,
    fail_rewind: bool,
}

impl RecordingOffsets {
    pub fn failing_rewind() -> Self {
        Self {
            fail_rewind: true,
            ..Self::default()
        }
    }

    pub fn commits(&self) -> Vec<Vec<MessageKey>> {
        self.commits.lock().unwrap().clone()
    }

    pub fn rewinds(&self) -> Vec<Vec<MessageKey>> {
        self.rewinds.lock().unwrap().clone()
    }
}

impl OffsetControl for RecordingOffsets {
    fn commit_batch(&self, batch: &[QueueRecord]) -> Result<()> {
        let next = offset_ranges(batch)
            .into_iter()
            .map(|((topic, partition), (_, last))| (topic, partition, last + 1))
            .collect();
        self.commits.lock().unwrap().push(next);
        Ok(())
    }

    fn rewind_batch(&self, batch: &[QueueRecord]) -> Result<()> {
        let first = offset_ranges(batch)
            .into_iter()
            .map(|((topic, partition), (first, _))| (topic, partition, first))
            .collect();
        self.rewinds.lock().unwrap().push(first);
        if self.fail_rewind {
            anyhow::bail!("partition not assigned");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeadLetters {
    forwarded: Mutex<Vec<(Vec<String>, String)>>,
    fail: bool,
}

impl RecordingDeadLetters {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Message ids and error text of every forwarded batch.
    pub fn forwarded(&self) -> Vec<(Vec<String>, String)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    fn topic(&self) -> &str {
        "catalog-items-dlq"
    }

    async fn forward(&self, batch: &[QueueRecord], error: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("dead-letter topic unavailable");
        }
        let ids = batch.iter().map(|record| record.message_id.clone()).collect();
        self.forwarded.lock().unwrap().push((ids, error.to_string()));
        Ok(())
    }
}
