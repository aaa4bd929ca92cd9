//! resilient-db - Main entry point.
//!
//! Builds the pool and executor for the configured database, verifies the
//! connection and runs any statements given on the command line, printing
//! results as JSON lines.

use resilient_db::config::Config;
use resilient_db::db::{Connector, Executor, MySqlConnector, PgConnector, Pool, RowOf, SqliteConnector};
use resilient_db::error::{DbError, DbResult};
use resilient_db::models::{DatabaseType, mask_connection_string};
use serde_json::json;
use sqlx::{Column, Row};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        std::process::exit(2);
    }

    let url = config.connection_string()?;
    let masked = mask_connection_string(&url);
    let db_type = DatabaseType::from_connection_string(&url)
        .ok_or_else(|| format!("Unknown database type for: {masked}"))?;

    info!(
        db_type = %db_type,
        url = %masked,
        "Starting resilient-db v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match db_type {
        DatabaseType::MySQL => run(&config, MySqlConnector::from_url(&url)?).await,
        DatabaseType::PostgreSQL => run(&config, PgConnector::from_url(&url)?).await,
        DatabaseType::SQLite => run(&config, SqliteConnector::from_url(&url)?).await,
    };

    if let Err(e) = result {
        error!(error = %e, kind = %e.kind(), attempts = ?e.attempts(), "Run failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {suggestion}");
        }
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run<C>(config: &Config, connector: C) -> DbResult<()>
where
    C: Connector,
    RowOf<C>: Row,
{
    let pool = Pool::connect(config.pool_options(), connector).await?;
    let executor = Executor::new(pool.clone(), config.retry_options());

    let outcome = tokio::select! {
        outcome = run_statements(config, &executor) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning remaining statements");
            Ok(())
        }
    };

    info!(stats = ?pool.stats(), "Closing connection pool");
    pool.close().await;
    outcome
}

async fn run_statements<C>(config: &Config, executor: &Executor<C>) -> DbResult<()>
where
    C: Connector,
    RowOf<C>: Row,
{
    executor.query("SELECT 1", &[]).await?;
    info!("Database is reachable");

    for statement in &config.queries {
        let rows = executor.query(statement, &[]).await?;
        let columns: Vec<&str> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name()).collect())
            .unwrap_or_default();
        print_json(&json!({
            "statement": statement,
            "rows": rows.len(),
            "columns": columns,
        }))?;
    }

    if config.atomic && !config.executes.is_empty() {
        let statements = Arc::new(config.executes.clone());
        let results = executor
            .transaction(move |tx| {
                let statements = Arc::clone(&statements);
                Box::pin(async move {
                    let mut results = Vec::with_capacity(statements.len());
                    for statement in statements.iter() {
                        results.push(tx.execute(statement, &[]).await?);
                    }
                    Ok(results)
                })
            })
            .await?;
        for (statement, result) in config.executes.iter().zip(results) {
            print_json(&json!({ "statement": statement, "result": result }))?;
        }
    } else {
        for statement in &config.executes {
            let result = executor.execute(statement, &[]).await?;
            print_json(&json!({ "statement": statement, "result": result }))?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> DbResult<()> {
    let line = serde_json::to_string(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize output: {e}")))?;
    println!("{line}");
    Ok(())
}
