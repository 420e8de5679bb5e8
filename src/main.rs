//! Chat server - entry point
//!
//! Binds the listener and runs until ctrl-c.

use std::env;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatline::Server;

/// Default server address
const DEFAULT_ADDR: &str = "0.0.0.0:3490";

/// Default server display name, echoed in login replies
const DEFAULT_NAME: &str = "Chat!";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chatline=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatline=info")),
        )
        .init();

    // Bind address and server name from the command line or defaults
    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let name = env::args().nth(2).unwrap_or_else(|| DEFAULT_NAME.to_string());

    let server = Server::bind(&addr, name).await?;
    info!("chat server listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await?;

    Ok(())
}
