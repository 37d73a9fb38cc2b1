use anyhow::Context;
use clap::Parser;
use ringside_simulator::{Api, Simulator, DEFAULT_COMMISSION_BPS};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Seed demo fights and funded users
    #[arg(short, long)]
    demo: bool,

    /// House commission on the pot, in basis points
    #[arg(long, default_value_t = DEFAULT_COMMISSION_BPS)]
    commission_bps: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let simulator = Simulator::new().with_commission(args.commission_bps);
    if args.demo {
        simulator.seed_demo();
        info!("Seeded demo fights and wallets");
    }
    let api = Api::new(Arc::new(simulator));
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}/api", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
