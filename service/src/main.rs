use std::path::Path;

use abi::Config;
use anyhow::{anyhow, Result};
use reservation_service::start_server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // $RESERVATION_CONFIG, ./reservation.yml, ~/.config/reservation.yml, /etc/reservation.yml
    let filename = std::env::var("RESERVATION_CONFIG").unwrap_or_else(|_| {
        let p1 = Path::new("./reservation.yml");
        let path = shellexpand::tilde("~/.config/reservation.yml");
        let p2 = Path::new(path.as_ref());
        let p3 = Path::new("/etc/reservation.yml");

        match (p1.exists(), p2.exists(), p3.exists()) {
            (true, _, _) => p1.to_str().unwrap_or_default().to_string(),
            (_, true, _) => p2.to_str().unwrap_or_default().to_string(),
            (_, _, true) => p3.to_str().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    });
    if filename.is_empty() {
        return Err(anyhow!("no reservation.yml found"));
    }

    let config = Config::load(&filename)?;
    start_server(&config).await
}
