//! Reconciler binary: fails stuck tasks on a fixed interval and reports
//! failures to the operations channel.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_reconciler::{Reconciler, ReconcilerConfig, SlackNotifier};
use reel_store::StoreClient;

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("reel=info".parse().unwrap()))
        .init();

    info!("Starting reel-reconciler");

    let store = match StoreClient::from_env() {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create store client: {e}");
            std::process::exit(1);
        }
    };

    let reconciler = Reconciler::new(
        store,
        SlackNotifier::from_env(),
        ReconcilerConfig::from_env(),
    );
    reconciler.run().await;
}
