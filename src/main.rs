use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use soap_validate::cache::ResolverCache;
use soap_validate::cli::Cli;
use soap_validate::config::{ConfigManager, LogFormat, LoggingConfig};
use soap_validate::fault::FaultHandler;
use soap_validate::mediator::SoapValidationMediator;
use soap_validate::output::{Output, ValidationReport};
use soap_validate::registry::RegistryDocumentSource;
use soap_validate::resolver::SchemaResolver;

/// Exit code when the message was stopped and a fault sent back
const EXIT_STOPPED: u8 = 1;
/// Exit code for usage and configuration errors
const EXIT_USAGE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_STOPPED),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

/// Run one mediation; `Ok(true)` when the message may continue
async fn run(cli: Cli) -> Result<bool> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    init_tracing(&config.logging);
    debug!(?config, "Configuration loaded");

    let envelope = tokio::fs::read_to_string(&cli.envelope)
        .await
        .with_context(|| format!("Failed to read {}", cli.envelope.display()))?;
    let mut ctx = cli
        .message_context(envelope)
        .with_context(|| format!("{} is not a SOAP envelope", cli.envelope.display()))?;

    let documents = RegistryDocumentSource::new(
        config.registry.root.clone(),
        config.http_client_config(),
    )
    .context("Failed to create document source")?;
    let cache = Arc::new(ResolverCache::new(config.cache_config()));
    let resolver = Arc::new(SchemaResolver::new(cache, Arc::new(documents)));
    let mediator = SoapValidationMediator::new(
        Arc::clone(&resolver),
        FaultHandler::new(config.fault.include_details),
    );

    let start = Instant::now();
    let mediation = mediator.mediate(&cli.api, &mut ctx).await;
    let elapsed = start.elapsed();
    info!(
        api_id = %cli.api,
        proceed = mediation.should_continue(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Mediation finished"
    );

    let report = ValidationReport::new(
        &cli.api,
        &cli.envelope,
        &mediation,
        &ctx,
        elapsed,
        resolver.stats().await,
    );
    let output = Output::new(cli.verbosity());
    print!(
        "{}",
        output
            .format_report(&report, cli.output_format)
            .context("Failed to render report")?
    );

    Ok(mediation.should_continue())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Human => builder.try_init(),
    };
}
