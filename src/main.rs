//! sqlweave - Main entry point.
//!
//! Opens one data source through the dynamic data source manager and prints
//! catalog information or table rows as JSON.

use serde_json::{Value as JsonValue, json};
use sqlweave::DynamicDataSourceManager;
use sqlweave::config::{Command, Config};
use sqlweave::models::NativeQuery;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(
    manager: &DynamicDataSourceManager,
    name: &str,
    command: Command,
) -> Result<JsonValue, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Probe => {
            let source = manager.data_source(name).await?;
            json!({
                "datasource": name,
                "dialect": source.dialect().name(),
                "reachable": source.test_connection().await.is_ok(),
                "server_version": source.pool().server_version().await,
            })
        }
        Command::Schemas => json!(manager.schemas(name).await?),
        Command::Tables { schema } => json!(manager.tables(name, schema.as_deref()).await?),
        Command::Columns { schema, table } => {
            json!(manager.columns(name, schema.as_deref(), &table).await?)
        }
        Command::Rows {
            schema,
            table,
            columns,
            distinct,
            limit,
            offset,
        } => {
            let mut query = NativeQuery::new(table);
            if let Some(schema) = schema {
                query = query.with_schema(schema);
            }
            for column in &columns {
                query = query.column(column.as_str());
            }
            query.distinct = distinct;
            query.limit = limit;
            query.offset = offset;

            let rows: Vec<JsonValue> = manager
                .rows(name, &query)
                .await?
                .iter()
                .map(|row| {
                    let object = columns
                        .iter()
                        .zip(row)
                        .map(|(column, value)| (column.clone(), value.to_json()))
                        .collect::<serde_json::Map<_, _>>();
                    JsonValue::Object(object)
                })
                .collect();
            JsonValue::Array(rows)
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!("Starting sqlweave v{}", env!("CARGO_PKG_VERSION"));

    let datasource = config.parse_datasource()?;
    let name = datasource.name.clone();
    let ds_config = datasource.into_config()?;

    let manager = DynamicDataSourceManager::new().with_query_timeout(config.query_timeout_duration());
    manager.configure(ds_config).await?;

    let result = run(&manager, &name, config.command.clone()).await;
    manager.terminate_all().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(datasource = %name, error = %e, "Command failed");
            Err(e)
        }
    }
}
