use anyhow::Context;
use clap::Parser;
use kumasi_simulator::{Api, Simulator};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Seed for the dice. Rolls are drawn from entropy when omitted.
    #[arg(short, long)]
    seed: Option<u64>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let simulator = match args.seed {
        Some(seed) => Simulator::seeded(seed),
        None => Simulator::new(Arc::new(kumasi_simulator::SeededDice::from_entropy())),
    };
    let api = Api::new(Arc::new(simulator));
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
