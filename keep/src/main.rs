use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keep::cli::{self, Cli};
use keep::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("keep: {error}");
            tracing::error!(%error, "command failed, see ops log for detail");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> keep::error::Result<()> {
    let config = Arc::new(Config::from_env());
    let keeper = keep::open_keeper(cli.collection, config).await?;

    tokio::select! {
        result = cli::run(&keeper, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            std::process::exit(130);
        }
    }
}

/// `KEEP_VERBOSE=1` selects debug logging; otherwise falls back to
/// `RUST_LOG`, then to `keep=info`.
fn init_tracing() {
    let verbose = std::env::var("KEEP_VERBOSE").as_deref() == Ok("1");
    let default_filter = if verbose { "keep=debug" } else { "keep=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
