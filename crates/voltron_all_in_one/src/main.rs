mod config;

use common::nats::{EnvelopeProducer, NatsClient};
use common::postgres::{ensure_findings_table, PostgresClient, PostgresFindingRepository};
use common::telemetry::init_telemetry;
use config::ServiceConfig;
use ingest_worker::domain::Dispatcher;
use ingest_worker::handlers::build_registry;
use ingest_worker::ingest_worker::IngestWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use voltron_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.telemetry()) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(
        source_queue = %config.source_queue,
        consumer_mode = %config.consumer_mode,
        "Starting voltron-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let worker_config = match config.worker() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Invalid worker configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let (postgres_client, nats_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let http_client = match build_http_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {:#}", e);
            std::process::exit(1);
        }
    };

    let registry = match build_registry(
        http_client,
        &config.handler_settings(),
        config.retry_policy(),
        &config.findings_table,
    ) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Invalid handler configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let producer = EnvelopeProducer::new(nats_client.create_publisher_client());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(PostgresFindingRepository::new(postgres_client)),
        Arc::new(producer.clone()),
    ));

    let worker = IngestWorker::new(
        dispatcher,
        nats_client.create_consumer_client(),
        producer,
        worker_config,
    );

    Runner::new()
        .with_named_process("ingest_worker", move |ctx| worker.run(ctx))
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            if let Ok(client) = Arc::try_unwrap(nats_client) {
                client.close().await;
            }
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(PostgresClient, Arc<NatsClient>)> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);

    info!("Connecting to PostgreSQL");
    let postgres_client = PostgresClient::new(&config.postgres())?;
    tokio::time::timeout(startup_timeout, postgres_client.ping())
        .await
        .map_err(|_| anyhow::anyhow!("PostgreSQL did not answer within {:?}", startup_timeout))??;
    ensure_findings_table(&postgres_client, &config.findings_table).await?;

    let nats_client = NatsClient::connect(&config.nats_url, startup_timeout).await?;
    nats_client.ensure_queue(&config.source_queue).await?;
    nats_client.ensure_queue(&config.destination_queue).await?;

    Ok((postgres_client, Arc::new(nats_client)))
}

// Shorter than the handler deadline so a hung page surfaces as a retryable timeout
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .user_agent("voltron-ingest")
        .build()?;
    Ok(client)
}

