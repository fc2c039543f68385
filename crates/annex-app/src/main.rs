//! Binary entrypoint for the Annex pipeline daemon.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = annex_app::run_app().await {
        tracing::error!(error = %err, "annex failed to start");
        std::process::exit(1);
    }
}
