//! Operational CLI for the outbox pipeline.
//!
//! Runs against the Postgres outbox (`DATABASE_URL`); read models are
//! materialized in-process for the lifetime of the invocation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use curaflow_billing::{InvoiceIssued, InvoiceVoided, PaymentRecorded};
use curaflow_events::ProjectorRegistry;
use curaflow_infra::outbox::{ConsumerConfig, OutboxConsumer, PostgresOutboxStore};
use curaflow_infra::projections::{
    PatientBalancesProjection, PatientRosterProjection, VisitSummariesProjection,
};
use curaflow_infra::read_model::InMemoryClinicStore;
use curaflow_infra::workers;
use curaflow_patients::{PatientArchived, PatientRegistered};
use curaflow_visits::{TreatmentAdded, VisitClosed, VisitOpened};

#[derive(Parser)]
#[command(name = "curaflow")]
#[command(about = "Clinic outbox pipeline operations")]
#[command(version)]
struct Cli {
    /// Postgres connection string (falls back to DATABASE_URL)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Process one batch of pending outbox records
    RunOnce {
        /// Records to claim in the batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Process batches until the backlog is empty
    Drain {
        /// Pause between batches, in milliseconds
        #[arg(long, default_value_t = 100)]
        pause_ms: u64,
    },

    /// Show outbox backlog counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    curaflow_observability::init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to database")?;

    match cli.command {
        Commands::Migrate => migrate(&pool).await,
        Commands::RunOnce { batch_size } => run_once(pool, batch_size).await,
        Commands::Drain { pause_ms } => drain(pool, pause_ms).await,
        Commands::Status => status(pool).await,
    }
}

async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../infra/migrations")
        .run(pool)
        .await
        .context("migration failed")?;
    info!("migrations applied");
    Ok(())
}

fn build_consumer(pool: PgPool, batch_size: Option<usize>) -> OutboxConsumer<PostgresOutboxStore> {
    let roster = Arc::new(PatientRosterProjection::new(InMemoryClinicStore::arc()));
    let visits = Arc::new(VisitSummariesProjection::new(InMemoryClinicStore::arc()));
    let balances = Arc::new(PatientBalancesProjection::new(InMemoryClinicStore::arc()));

    let mut registry = ProjectorRegistry::new();
    registry.register(PatientRegistered::EVENT, roster.clone());
    registry.register(PatientArchived::EVENT, roster);
    registry.register(VisitOpened::EVENT, visits.clone());
    registry.register(TreatmentAdded::EVENT, visits.clone());
    registry.register(VisitClosed::EVENT, visits);
    registry.register(InvoiceIssued::EVENT, balances.clone());
    registry.register(PaymentRecorded::EVENT, balances.clone());
    registry.register(InvoiceVoided::EVENT, balances);

    let config = match batch_size {
        Some(batch_size) => ConsumerConfig {
            batch_size,
            ..ConsumerConfig::default()
        },
        None => ConsumerConfig::default(),
    };

    OutboxConsumer::with_config(PostgresOutboxStore::new(pool), Arc::new(registry), config)
}

async fn run_once(pool: PgPool, batch_size: Option<usize>) -> Result<()> {
    let consumer = build_consumer(pool, batch_size);

    // The consumer's store bridges back onto this runtime, so drive it from
    // a blocking thread rather than an async worker.
    let report = tokio::task::spawn_blocking(move || workers::run_once(&consumer, None))
        .await
        .context("consumer task panicked")??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn drain(pool: PgPool, pause_ms: u64) -> Result<()> {
    let consumer = build_consumer(pool, None);
    let pause = Duration::from_millis(pause_ms);

    let report = tokio::task::spawn_blocking(move || workers::drain(&consumer, pause))
        .await
        .context("consumer task panicked")??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn status(pool: PgPool) -> Result<()> {
    let store = PostgresOutboxStore::new(pool);
    let pending = store
        .count_by_status(curaflow_infra::outbox::OutboxStatus::Pending)
        .await?;
    let processed = store
        .count_by_status(curaflow_infra::outbox::OutboxStatus::Processed)
        .await?;
    let failed = store
        .count_by_status(curaflow_infra::outbox::OutboxStatus::Failed)
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "pending": pending,
            "processed": processed,
            "failed": failed,
        }))?
    );
    Ok(())
}
