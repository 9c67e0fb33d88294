use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::{self, Instant};

/// Platform envelope around one queued ingestion message. The body is kept as
/// raw bytes; decoding happens with the rest of validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub message_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub body: Vec<u8>,
    pub receive_count: u32,
}

pub type MessageKey = (String, i32, i64);

impl QueueRecord {
    pub fn new(topic: &str, partition: i32, offset: i64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: format!("{}/{}/{}", topic, partition, offset),
            topic: topic.to_string(),
            partition,
            offset,
            body: body.into(),
            receive_count: 0,
        }
    }

    pub fn from_message<M: Message>(message: &M) -> Self {
        let body = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        Self::new(message.topic(), message.partition(), message.offset(), body)
    }

    pub fn key(&self) -> MessageKey {
        (self.topic.clone(), self.partition, self.offset)
    }
}

/// Lowest and highest offset per partition in the batch.
pub fn offset_ranges(batch: &[QueueRecord]) -> BTreeMap<(String, i32), (i64, i64)> {
    let mut ranges: BTreeMap<(String, i32), (i64, i64)> = BTreeMap::new();
    for record in batch {
        ranges
            .entry((record.topic.clone(), record.partition))
            .and_modify(|(first, last)| {
                *first = (*first).min(record.offset);
                *last = (*last).max(record.offset);
            })
            .or_insert((record.offset, record.offset));
    }
    ranges
}

/// Waits for the first item, then keeps collecting until `max` items are
/// gathered or `window` has elapsed since the first one arrived. Returns
/// `None` once the stream is exhausted.
pub async fn next_batch<S>(stream: &mut S, max: usize, window: Duration) -> Option<Vec<S::Item>>
where
    S: Stream + Unpin,
{
    let first = stream.next().await?;
    let mut batch = Vec::with_capacity(max);
    batch.push(first);

    let deadline = Instant::now() + window;
    while batch.len() < max {
        match time::timeout_at(deadline, stream.next()).await {
            Ok(Some(item)) => batch.push(item),
            Ok(None) | Err(_) => break,
        }
    }

    Some(batch)
}

pub const DEFAULT_TRACKER_CAPACITY: usize = 10_000;

/// Per-message delivery counts for the lifetime of the consumer. Committing a
/// batch forgets every count at or below the committed offsets of its
/// partitions. Past `capacity` entries, counts for partitions that are not in
/// the current batch are dropped, which covers partitions lost in a rebalance.
#[derive(Debug)]
pub struct ReceiveTracker {
    counts: HashMap<MessageKey, u32>,
    capacity: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACKER_CAPACITY)
    }
}

impl ReceiveTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: HashMap::new(),
            capacity,
        }
    }

    /// Records one more delivery of `key` and returns the running count.
    pub fn observe(&mut self, key: MessageKey) -> u32 {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Stamps every record with its receive count.
    pub fn observe_batch(&mut self, batch: &mut [QueueRecord]) {
        for record in batch.iter_mut() {
            record.receive_count = self.observe(record.key());
        }

        if self.counts.len() > self.capacity {
            let live: HashSet<(&str, i32)> = batch
                .iter()
                .map(|record| (record.topic.as_str(), record.partition))
                .collect();
            self.counts
                .retain(|(topic, partition, _), _| live.contains(&(topic.as_str(), *partition)));
        }
    }

    pub fn release(&mut self, batch: &[QueueRecord]) {
        let ranges = offset_ranges(batch);
        self.counts.retain(|(topic, partition, offset), _| {
            !ranges
                .iter()
                .any(|((t, p), (_, last))| t == topic && p == partition && offset <= last)
        });
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}

/// Moves the consumer's position in the ingestion topic.
pub trait OffsetControl {
    /// Marks every message of the batch as consumed.
    fn commit_batch(&self, batch: &[QueueRecord]) -> Result<()>;

    /// Moves each partition of the batch back to its first offset.
    fn rewind_batch(&self, batch: &[QueueRecord]) -> Result<()>;
}

impl OffsetControl for StreamConsumer {
    fn commit_batch(&self, batch: &[QueueRecord]) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        for ((topic, partition), (_, last)) in offset_ranges(batch) {
            offsets.add_partition_offset(&topic, partition, Offset::Offset(last + 1))?;
        }
        self.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    fn rewind_batch(&self, batch: &[QueueRecord]) -> Result<()> {
        for ((topic, partition), (first, _)) in offset_ranges(batch) {
            self.seek(&topic, partition, Offset::Offset(first), Duration::from_secs(5))
                .with_context(|| format!("rewinding {}[{}] to {}", topic, partition, first))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Commit,
    Redeliver,
    DeadLetter,
}

/// Decides what happens to a batch after an invocation. Without a
/// `max_receive_count` a failing batch is redelivered indefinitely.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedrivePolicy {
    pub max_receive_count: Option<u32>,
}

impl RedrivePolicy {
    pub fn disposition(&self, succeeded: bool, batch: &[QueueRecord]) -> Disposition {
        if succeeded {
            return Disposition::Commit;
        }

        match self.max_receive_count {
            Some(max) if batch.iter().any(|record| record.receive_count >= max) => Disposition::DeadLetter,
            _ => Disposition::Redeliver,
        }
    }
}

/// Destination for batches that reached the receive limit.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    fn topic(&self) -> &str;

    async fn forward(&self, batch: &[QueueRecord], error: &str) -> Result<()>;
}

pub struct DeadLetterQueue {
    producer: FutureProducer,
    topic: String,
}

impl DeadLetterQueue {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    /// Republishes each record verbatim with its origin in the headers.
    async fn forward(&self, batch: &[QueueRecord], error: &str) -> Result<()> {
        for record in batch {
            let partition = record.partition.to_string();
            let offset = record.offset.to_string();
            let receive_count = record.receive_count.to_string();
            let headers = OwnedHeaders::new()
                .insert(Header { key: "source-topic", value: Some(record.topic.as_str()) })
                .insert(Header { key: "source-partition", value: Some(partition.as_str()) })
                .insert(Header { key: "source-offset", value: Some(offset.as_str()) })
                .insert(Header { key: "receive-count", value: Some(receive_count.as_str()) })
                .insert(Header { key: "error", value: Some(error) });

            let fr = FutureRecord::<(), _>::to(&self.topic)
                .payload(&record.body)
                .headers(headers);

            self.producer.send(fr, Duration::from_secs(5)).await
                .map_err(|(e, _)| anyhow::anyhow!("Failed to dead-letter {}: {}", record.message_id, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use rdkafka::message::{OwnedMessage, Timestamp};

    fn record(offset: i64, receive_count: u32) -> QueueRecord {
        QueueRecord {
            receive_count,
            ..QueueRecord::new("catalog-items", 0, offset, "{}")
        }
    }

    #[tokio::test]
    async fn batches_are_capped_at_max() {
        let mut items = stream::iter(1..=12);
        let window = Duration::from_millis(50);

        assert_eq!(next_batch(&mut items, 5, window).await, Some(vec![1, 2, 3, 4, 5]));
        assert_eq!(next_batch(&mut items, 5, window).await, Some(vec![6, 7, 8, 9, 10]));
        assert_eq!(next_batch(&mut items, 5, window).await, Some(vec![11, 12]));
        assert_eq!(next_batch(&mut items, 5, window).await, None);
    }

    #[tokio::test]
    async fn partial_batch_returns_when_window_elapses() {
        let mut items = stream::iter(vec![1, 2]).chain(stream::pending());

        let started = Instant::now();
        let batch = next_batch(&mut items, 5, Duration::from_millis(20)).await;

        assert_eq!(batch, Some(vec![1, 2]));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn tracker_counts_redeliveries_until_released() {
        let mut tracker = ReceiveTracker::default();
        let first = record(7, 0);

        assert_eq!(tracker.observe(first.key()), 1);
        assert_eq!(tracker.observe(first.key()), 2);
        assert_eq!(tracker.observe(record(8, 0).key()), 1);

        tracker.release(&[first.clone()]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.observe(first.key()), 1);
    }

    #[test]
    fn from_message_keeps_raw_payload() {
        let message = OwnedMessage::new(
            Some(vec![0xff, b'{']),
            None,
            "catalog-items".to_string(),
            Timestamp::NotAvailable,
            2,
            41,
            None,
        );

        let record = QueueRecord::from_message(&message);
        assert_eq!(record.message_id, "catalog-items/2/41");
        assert_eq!(record.body, vec![0xff, b'{']);
        assert_eq!(record.receive_count, 0);
    }

    #[test]
    fn commit_forgets_counts_up_to_the_committed_offset() {
        let mut tracker = ReceiveTracker::default();
        let mut stale = vec![record(3, 0), record(4, 0)];
        tracker.observe_batch(&mut stale);
        let mut other_partition = vec![QueueRecord::new("catalog-items", 1, 3, "{}")];
        tracker.observe_batch(&mut other_partition);

        tracker.release(&[record(5, 0), record(6, 0)]);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.observe(other_partition[0].key()), 2);
    }

    #[test]
    fn tracker_drops_idle_partitions_past_capacity() {
        let mut tracker = ReceiveTracker::with_capacity(3);
        let mut revoked: Vec<QueueRecord> = (0..3)
            .map(|offset| QueueRecord::new("catalog-items", 7, offset, "{}"))
            .collect();
        tracker.observe_batch(&mut revoked);
        assert_eq!(tracker.len(), 3);

        let mut current = vec![record(0, 0), record(1, 0)];
        tracker.observe_batch(&mut current);

        assert_eq!(tracker.len(), 2);
        assert_eq!(current[0].receive_count, 1);
        assert_eq!(tracker.observe(revoked[0].key()), 1);
    }

    #[test]
    fn offset_ranges_span_each_partition() {
        let records = vec![
            QueueRecord::new("catalog-items", 0, 11, "{}"),
            QueueRecord::new("catalog-items", 1, 4, "{}"),
            QueueRecord::new("catalog-items", 0, 9, "{}"),
            QueueRecord::new("catalog-items", 0, 10, "{}"),
        ];

        let ranges = offset_ranges(&records);
        assert_eq!(ranges[&("catalog-items".to_string(), 0)], (9, 11));
        assert_eq!(ranges[&("catalog-items".to_string(), 1)], (4, 4));
    }

    #[test]
    fn success_always_commits() {
        let policy = RedrivePolicy { max_receive_count: Some(1) };
        assert_eq!(policy.disposition(true, &[record(0, 9)]), Disposition::Commit);
    }

    #[test]
    fn failure_redelivers_below_the_limit() {
        let policy = RedrivePolicy { max_receive_count: Some(3) };
        let batch = [record(0, 2), record(1, 1)];
        assert_eq!(policy.disposition(false, &batch), Disposition::Redeliver);
    }

    #[test]
    fn failure_at_the_limit_dead_letters() {
        let policy = RedrivePolicy { max_receive_count: Some(3) };
        let batch = [record(0, 1), record(1, 3)];
        assert_eq!(policy.disposition(false, &batch), Disposition::DeadLetter);
    }

    #[test]
    fn unbounded_policy_never_dead_letters() {
        let policy = RedrivePolicy::default();
        assert_eq!(policy.disposition(false, &[record(0, 1_000)]), Disposition::Redeliver);
    }
}
