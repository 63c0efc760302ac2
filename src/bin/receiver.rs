//! Standalone receiver process: accepts producer connections and logs every
//! accepted line in place of a real downstream sink.

use anyhow::Context;
use floodgate::{Config, DataReceiver, MessageSink};

struct LogSink;

impl MessageSink for LogSink {
    fn on_message(&self, message: &str) {
        tracing::info!("Received message: {}", message);
    }

    fn on_shutdown(&self) {
        tracing::info!("Sink notified of shutdown");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load("config").context("Error loading config")?;
    tracing_subscriber::fmt::init();

    let receiver = DataReceiver::bind(config.port, LogSink).await?;
    let shutdown = receiver.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-c received");
            shutdown.cancel();
        }
    });

    receiver.run().await?;
    Ok(())
}
