use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use authsource::{Config, SqlAdapters, cli, config::Args, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args)?;
    config.validate()?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let Some(command) = args.command else {
        anyhow::bail!("No command given, see --help");
    };

    let adapters = SqlAdapters::from_config(&config.source)?;
    let url = config
        .database_url
        .as_deref()
        .context("database_url is not configured (set DATABASE_URL or database_url in the config file)")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.pool.max_connections)
        .acquire_timeout(config.pool.acquire_timeout())
        .connect(url)
        .await
        .context("Failed to connect to the database")?;

    // One transaction per invocation; any error rolls everything back
    let mut tx = pool.begin().await?;
    let output = cli::run(&adapters, &mut *tx, &command).await?;
    tx.commit().await?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    pool.close().await;
    Ok(())
}
