use axum::http::StatusCode;
use futures::StreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::{IngestionMessage, CSV_HEADERS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use crate::events::{S3Event, S3EventRecord};
use crate::queue::IngestionQueue;
use crate::storage::parsed_key;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("object {key} belongs to bucket {bucket}, expected {expected}")]
    ForeignBucket {
        bucket: String,
        key: String,
        expected: String,
    },

    #[error("invalid object key {key}: {source}")]
    InvalidKey {
        key: String,
        source: object_store::path::Error,
    },

    #[error("failed to fetch {key}: {source}")]
    Fetch {
        key: String,
        source: object_store::Error,
    },

    #[error("{key} is not valid UTF-8: {source}")]
    Decode {
        key: String,
        source: std::string::FromUtf8Error,
    },

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to enqueue row {row} of {key}: {cause:#}")]
    Enqueue {
        key: String,
        row: usize,
        cause: anyhow::Error,
    },

    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: String,
        to: String,
        source: object_store::Error,
    },

    #[error("invocation exceeded its {0:?} budget")]
    Timeout(Duration),
}

/// Outcome of one parser invocation, shaped like an HTTP result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    pub status: StatusCode,
    pub message: &'static str,
}

impl InvocationResponse {
    fn processed() -> Self {
        Self {
            status: StatusCode::OK,
            message: "Files processed successfully",
        }
    }

    fn failed() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Error processing files",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub source_key: String,
    pub parsed_key: String,
    pub rows: usize,
}

/// Parses header-delimited CSV text into one message per data row.
pub fn parse_rows(text: &str) -> Result<Vec<IngestionMessage>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    let headers = reader.headers()?.clone();
    let mut indices = [0usize; 4];
    for (slot, name) in indices.iter_mut().zip(CSV_HEADERS) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or(ImportError::MissingHeader(name))?;
    }
    let [title, description, price, count] = indices;

    let mut messages = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        messages.push(IngestionMessage {
            title: field(title),
            description: field(description),
            price: field(price),
            count: field(count),
        });
    }

    Ok(messages)
}

pub struct FileIntakeParser {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    queue: Arc<dyn IngestionQueue>,
    timeout: Duration,
}

impl FileIntakeParser {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        queue: Arc<dyn IngestionQueue>,
        timeout: Duration,
    ) -> Self {
        Self { store, bucket, queue, timeout }
    }

    /// Runs one invocation and folds any failure into a 500-equivalent result.
    pub async fn handle(&self, event: &S3Event) -> InvocationResponse {
        info!("Incoming storage event with {} record(s)", event.records.len());

        match self.invoke(event).await {
            Ok(files) => {
                for file in &files {
                    info!("File {} processed ({} rows), moved to {}", file.source_key, file.rows, file.parsed_key);
                }
                InvocationResponse::processed()
            }
            Err(e) => {
                error!("Error processing files: {}", e);
                InvocationResponse::failed()
            }
        }
    }

    /// Processes the event within the invocation budget.
    pub async fn invoke(&self, event: &S3Event) -> Result<Vec<ParsedFile>, ImportError> {
        match tokio::time::timeout(self.timeout, self.process_event(event)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ImportError::Timeout(self.timeout)),
        }
    }

    pub async fn process_event(&self, event: &S3Event) -> Result<Vec<ParsedFile>, ImportError> {
        let mut files = Vec::with_capacity(event.records.len());
        for record in &event.records {
            if let Some(file) = self.process_record(record).await? {
                files.push(file);
            }
        }
        Ok(files)
    }

    async fn process_record(&self, record: &S3EventRecord) -> Result<Option<ParsedFile>, ImportError> {
        let bucket = &record.s3.bucket.name;
        let key = &record.s3.object.key;

        let Some(target_key) = parsed_key(key) else {
            debug!("Skipping {} ({:?}): not under the upload prefix", key, record.event_name);
            return Ok(None);
        };

        if *bucket != self.bucket {
            return Err(ImportError::ForeignBucket {
                bucket: bucket.clone(),
                key: key.clone(),
                expected: self.bucket.clone(),
            });
        }

        info!("Processing file: {} from bucket: {} (size {:?})", key, bucket, record.s3.object.size);

        let source = Path::parse(key).map_err(|source| ImportError::InvalidKey {
            key: key.clone(),
            source,
        })?;
        let target = Path::parse(&target_key).map_err(|source| ImportError::InvalidKey {
            key: target_key.clone(),
            source,
        })?;

        let fetch_err = |source| ImportError::Fetch { key: key.clone(), source };
        let bytes = self.store.get(&source).await.map_err(fetch_err)?
            .bytes().await.map_err(fetch_err)?;
        let text = String::from_utf8(bytes.to_vec()).map_err(|source| ImportError::Decode {
            key: key.clone(),
            source,
        })?;

        let messages = parse_rows(&text)?;
        for (row, message) in messages.iter().enumerate() {
            debug!("Parsed record: {:?}", message);
            self.queue.send(message).await.map_err(|cause| ImportError::Enqueue {
                key: key.clone(),
                row: row + 1,
                cause,
            })?;
        }

        // Copy then delete: a crash in between leaves the upload in place
        // and a later reprocess only duplicates rows.
        let move_err = |source| ImportError::Move {
            from: key.clone(),
            to: target_key.clone(),
            source,
        };
        self.store.copy(&source, &target).await.map_err(move_err)?;
        self.store.delete(&source).await.map_err(move_err)?;

        Ok(Some(ParsedFile {
            source_key: key.clone(),
            parsed_key: target_key,
            rows: messages.len(),
        }))
    }
}

/// Feeds bucket notifications from Kafka into the parser. Each message is
/// committed once handled, whatever the outcome: failed files are not retried.
pub struct StorageEventHandler {
    parser: FileIntakeParser,
}

impl StorageEventHandler {
    pub fn new(parser: FileIntakeParser) -> Self {
        Self { parser }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    match m.payload_view::<str>() {
                        Some(Ok(json_str)) => match serde_json::from_str::<S3Event>(json_str) {
                            Ok(event) => {
                                let response = self.parser.handle(&event).await;
                                info!("Storage event at offset {} finished with {}: {}", m.offset(), response.status, response.message);
                            }
                            Err(e) => warn!("Ignoring malformed storage event at offset {}: {}", m.offset(), e),
                        },
                        Some(Err(e)) => error!("Error parsing payload: {}", e),
                        None => warn!("Ignoring empty storage event at offset {}", m.offset()),
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }
}
