use clap::Parser;
use tracing::info;

mod app;

/// Personal messaging-automation gateway.
#[derive(Parser)]
#[command(name = "doppel-gateway", version)]
struct Args {
    /// Path to doppel.toml (default: ~/.doppel/doppel.toml, DOPPEL_* env
    /// vars override either way).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doppel=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = doppel_core::config::DoppelConfig::load(args.config.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            doppel_core::config::DoppelConfig::default()
        });

    let app = app::App::build(config).await?;
    info!("doppel gateway started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    app.shutdown().await;

    Ok(())
}
