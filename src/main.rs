use anyhow::{bail, Context};
use sqlbridge::config::Config;
use sqlbridge::models::{ConnectionDescriptor, FetchMode, QueryRequest};
use sqlbridge::services::database;
use sqlbridge::services::{
    BatchLoader, JsonLinesRowSource, PlainRenderer, PollingTrigger, StatementRunner, TickOutcome,
};
use sqlbridge::storage::{LocalStaging, Staging};
use std::sync::Arc;
use tracing::{error, info, warn};

const USAGE: &str = "usage: sqlbridge <sql> | sqlbridge load <sql> <jsonl file or staged uri> [col,col...] | sqlbridge watch <sql>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let url = std::env::var("SQLBRIDGE_URL").context("SQLBRIDGE_URL is not set")?;
    let mut descriptor = ConnectionDescriptor::new(url);
    descriptor.username = std::env::var("SQLBRIDGE_USERNAME").ok();
    descriptor.password = std::env::var("SQLBRIDGE_PASSWORD").ok();

    let staging = Arc::new(LocalStaging::new(&config.staging.root_dir));
    let runner = Arc::new(StatementRunner::new(staging.clone(), &config.staging.temp_dir));

    let args: Vec<String> = std::env::args().skip(1).collect();
    info!("Connecting to {}", database::mask_credentials(&descriptor.url));
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["load", sql, source, rest @ ..] => {
            let columns = rest.first().map(|list| list.split(',').map(str::to_string).collect::<Vec<_>>());
            load(&config, &descriptor, staging.as_ref(), sql, source, columns.as_deref()).await
        }
        ["watch", sql] => watch(&config, descriptor, runner, sql).await,
        [sql] if *sql != "load" && *sql != "watch" => {
            let mut request = QueryRequest::new(*sql)
                .with_fetch_mode(FetchMode::Fetch)
                .with_time_zone(config.time_zone()?);
            request.fetch_size = config.fetch_size();

            let outcome = runner.run(&descriptor, &PlainRenderer, &request).await.map_err(|e| {
                error!("Query failed: {}", e);
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome.multi_output())?);
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

/// Bulk-loads a JSON lines file through one parameterised statement
async fn load(
    config: &Config,
    descriptor: &ConnectionDescriptor,
    staging: &dyn Staging,
    sql: &str,
    source: &str,
    columns: Option<&[String]>,
) -> anyhow::Result<()> {
    let mut rows = if source.starts_with("file:") {
        JsonLinesRowSource::open(staging, source).await?
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("Cannot open {}", source))?;
        JsonLinesRowSource::new(Box::new(tokio::io::BufReader::new(file)))
    };

    let mut connection = database::connect(descriptor, &PlainRenderer).await?;
    let loaded = BatchLoader::new(config.execution.batch_size)
        .load(connection.as_mut(), sql, columns, &mut rows)
        .await;
    if let Err(e) = connection.close().await {
        warn!("Failed to close connection: {}", e);
    }

    let output = loaded.map_err(|e| {
        error!("Load failed: {}", e);
        e
    })?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Evaluates a trigger query every `trigger.interval_secs`, printing each firing
async fn watch(
    config: &Config,
    descriptor: ConnectionDescriptor,
    runner: Arc<StatementRunner>,
    sql: &str,
) -> anyhow::Result<()> {
    let request = QueryRequest::new(sql)
        .with_fetch_mode(FetchMode::Fetch)
        .with_time_zone(config.time_zone()?);
    let trigger = PollingTrigger::new("cli", descriptor, request, runner, Arc::new(PlainRenderer))?
        .with_interval(config.trigger_interval());

    let mut interval = tokio::time::interval(config.trigger_interval());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match trigger.tick().await {
                    TickOutcome::Fired(event) => println!("{}", serde_json::to_string(&event)?),
                    TickOutcome::Idle => info!("Trigger '{}' found no rows", trigger.id()),
                    TickOutcome::Failed(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping trigger '{}'", trigger.id());
                return Ok(());
            }
        }
    }
}
