mod worker;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    worker::run().await
}
