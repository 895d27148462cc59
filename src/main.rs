use clap::Parser;

use parley::oracle::ollama::OllamaOracle;
use parley::{cli, config, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = cli::Cli::parse();
    tracing::info!("Parley starting");

    let config = config::load_config(&cli)?;
    tracing::info!(
        bind = %config.bind_addr,
        model = %config.model,
        oracle = %config.oracle_url,
        max_depth = config.max_delegation_depth,
        "Config loaded"
    );

    match cli.command {
        cli::Commands::Serve { .. } => {
            // A cold oracle is a warning, not a startup failure: the server
            // can come up first and the model can be pulled later.
            let probe = OllamaOracle::new(&config.oracle_url, &config.model);
            if let Err(e) = probe.check_ready().await {
                tracing::warn!(error = %e, "oracle not ready; requests will fail until it is");
            }

            let state = server::build_state(config);
            server::serve(state).await?;
        }
    }

    Ok(())
}
