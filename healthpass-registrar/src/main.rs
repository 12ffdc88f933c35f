//! Healthpass batch registrar
//!
//! Pre-registers the holders listed in a batch file against the SQLite
//! store and prints the batch report as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use healthpass_core::{EntityRegistry, HolderRecord, RandomCodeGenerator};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use healthpass_registrar::{
    ConsoleNotifier, InMemoryOrganizationDirectory, Notifier, Registrar, RegistrarConfig,
    SmtpConfig, SmtpNotifier, SqliteDocumentStore, TracingAuditLog,
};

/// Contents of the file named by HEALTHPASS_BATCH_FILE
#[derive(Debug, Deserialize)]
struct BatchFile {
    organization: String,
    records: Vec<HolderRecord>,
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} must be set", key))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthpass_registrar=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = RegistrarConfig::from_env();
    tracing::info!(?config, "Loaded configuration");

    let orgs_path = required_env("HEALTHPASS_ORGANIZATIONS")?;
    let orgs_json = std::fs::read_to_string(&orgs_path)
        .with_context(|| format!("reading organizations from {}", orgs_path))?;
    let orgs = InMemoryOrganizationDirectory::from_json(&orgs_json, &EntityRegistry::builtin(), &config)?;

    let batch_path = required_env("HEALTHPASS_BATCH_FILE")?;
    let batch: BatchFile = serde_json::from_str(
        &std::fs::read_to_string(&batch_path)
            .with_context(|| format!("reading batch from {}", batch_path))?,
    )
    .with_context(|| format!("parsing batch file {}", batch_path))?;

    let store = SqliteDocumentStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path))?;
    tracing::info!(path = %config.database_path, "Opened document store");

    let notifier: Arc<dyn Notifier> = match SmtpConfig::from_env() {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, "Using SMTP notifier");
            Arc::new(SmtpNotifier::new(smtp).map_err(anyhow::Error::msg)?)
        }
        None => {
            tracing::info!("SMTP not configured, printing notifications to the console");
            Arc::new(ConsoleNotifier::new())
        }
    };

    let registrar = Registrar::new(
        config,
        Arc::new(store),
        Arc::new(orgs),
        notifier,
        Arc::new(TracingAuditLog),
        Arc::new(RandomCodeGenerator::new()),
    );

    let report = registrar.upload(&batch.organization, batch.records)?;
    println!("{}", serde_json::to_string_pretty(&report.to_response())?);

    Ok(())
}
