#![warn(
    clippy::correctness,
    clippy::perf,
    clippy::suspicious,
    clippy::complexity
)]

use std::error::Error;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rendezvous_backend::config::RendezvousConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(
                #[cfg(debug_assertions)]
                |_| "trace,rendezvous_backend=debug".into(),
                #[cfg(not(debug_assertions))]
                |_| "info".into(),
            ),
        ))
        .with(
            #[cfg(debug_assertions)]
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true),
            #[cfg(not(debug_assertions))]
            tracing_subscriber::fmt::layer().compact(),
        )
        .try_init()?;

    let config = RendezvousConfig::from_env()?;
    rendezvous_backend::serve(config).await?;

    Ok(())
}
