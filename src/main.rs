//! cinderkv server entry point.
//!
//! Binds the listener, wires up logging, and keeps the process alive
//! until Ctrl+C.

use cinderkv::{Server, MB};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn usage() -> ! {
    eprintln!("usage: cinderkv <port> <maxmemory-mb>");
    eprintln!();
    eprintln!("    <port>          TCP port to listen on");
    eprintln!("    <maxmemory-mb>  cache byte budget in MB (0 = unbounded)");
    std::process::exit(1);
}

fn parse_args() -> (u16, usize) {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        usage();
    }
    let port = match args[1].parse() {
        Ok(port) => port,
        Err(_) => {
            eprintln!("error: invalid port: {}", args[1]);
            usage();
        }
    };
    let size_mb = match args[2].parse() {
        Ok(mb) => mb,
        Err(_) => {
            eprintln!("error: invalid memory budget: {}", args[2]);
            usage();
        }
    };
    (port, size_mb)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (port, size_mb) = parse_args();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let server = Server::start(port, size_mb * MB).await?;
    info!(
        port = server.local_addr().port(),
        maxmemory_mb = size_mb,
        version = cinderkv::VERSION,
        "cinderkv started, ready to accept connections"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping server...");
    server.stop();

    Ok(())
}
