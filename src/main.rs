use clap::Parser;
use podtail::{AgentConfig, ContainerMetadata, Dispatcher, JsonLinesSink, StagedPipeline};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = AgentConfig::parse();
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        process::exit(2);
    }

    let mut pipeline = StagedPipeline::new();
    if !config.no_metadata {
        pipeline.push(ContainerMetadata);
    }
    pipeline.push(JsonLinesSink::stdout());
    info!(stages = ?pipeline.stage_names(), "pipeline ready");

    let dispatcher = match Dispatcher::new(config, Arc::new(pipeline)).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!(error = %e, "failed to set up dispatcher");
            process::exit(1);
        }
    };

    dispatcher.start().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    dispatcher.stop().await;
}

// Logs go to stderr; stdout carries the JSON lines.
fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
