mod agent;
mod cli;
mod client;
mod cmd;
mod config;
mod coordinator;
mod daemon;
mod detect;
mod logger;
mod notify;
mod pane;
mod parser;
mod producers;
mod progress;
mod store;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "muxherd start");

    match cli::run() {
        Ok(result) => {
            info!("muxherd finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "muxherd failed");
            Err(err)
        }
    }
}
