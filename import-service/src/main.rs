mod api;
mod events;
mod handlers;
mod queue;
mod storage;
#[cfg(test)]
mod testutils;

use anyhow::Result;
use clap::Parser;
use object_store::aws::AmazonS3Builder;
use rdkafka::consumer::Consumer;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "import-service")]
struct Args {
    #[arg(long, env = "BUCKET_NAME", default_value = "bucket-for-files-import")]
    bucket_name: String,

    /// Custom endpoint for S3-compatible stores such as MinIO.
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    #[arg(long, env = "AWS_REGION", default_value = "us-east-2")]
    region: String,

    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    kafka_brokers: String,

    #[arg(long, env = "STORAGE_EVENTS_TOPIC", default_value = "bucket-events")]
    storage_events_topic: String,

    #[arg(long, env = "CATALOG_ITEMS_TOPIC", default_value = "catalog-items")]
    catalog_items_topic: String,

    #[arg(long, env = "PARSER_TIMEOUT_SECS", default_value = "30")]
    parser_timeout_secs: u64,

    #[arg(long, env = "UPLOAD_URL_EXPIRY_SECS", default_value = "3600")]
    upload_url_expiry_secs: u64,

    #[arg(long, env = "PORT", default_value = "3002")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    shared::telemetry::init();
    let args = Args::parse();

    // Credentials come from the standard AWS_* environment variables.
    let mut s3 = AmazonS3Builder::from_env()
        .with_bucket_name(&args.bucket_name)
        .with_region(&args.region);
    if let Some(endpoint) = &args.s3_endpoint {
        s3 = s3.with_endpoint(endpoint).with_allow_http(true);
    }
    let s3 = Arc::new(s3.build()?);

    let producer = shared::kafka::producer(&args.kafka_brokers)?;
    let consumer = shared::kafka::consumer(&args.kafka_brokers, "import-service")?;
    consumer.subscribe(&[&args.storage_events_topic])?;

    let queue = Arc::new(queue::KafkaIngestionQueue::new(producer, args.catalog_items_topic.clone()));
    let parser = handlers::FileIntakeParser::new(
        s3,
        args.bucket_name.clone(),
        queue,
        Duration::from_secs(args.parser_timeout_secs),
    );
    let event_handler = handlers::StorageEventHandler::new(parser);

    tokio::spawn(async move {
        event_handler.run(consumer).await;
    });

    let signer = storage::S3UploadSigner::from_env(
        args.bucket_name.clone(),
        args.region.clone(),
        args.s3_endpoint.clone(),
    )
    .await;

    let app_state = api::AppState {
        signer: Arc::new(signer),
        url_expiry: Duration::from_secs(args.upload_url_expiry_secs),
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Import service consuming {} and publishing to {}", args.storage_events_topic, args.catalog_items_topic);
    info!("Import service ready to accept HTTP requests at http://0.0.0.0:{}/import", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
