//! Standalone producer process: connects to the receiver and emits random
//! lorem-style lines at the configured rate until stopped locally (ctrl-c)
//! or by the receiver's shutdown command.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use floodgate::{Config, DataProducer, Generator};

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua",
];

/// Produces 7 to 12 random words per line.
struct LoremGenerator {
    rng: StdRng,
}

impl LoremGenerator {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Generator for LoremGenerator {
    fn next_line(&mut self) -> String {
        let count = self.rng.gen_range(7..=12);
        (0..count)
            .map(|_| WORDS[self.rng.gen_range(0..WORDS.len())])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load("config").context("Error loading config")?;
    tracing_subscriber::fmt::init();

    let producer = DataProducer::new(
        config.target_host.clone(),
        config.target_port,
        config.messages_per_second,
    )?
    .with_retry_policy(config.retry_policy());

    let handle = producer.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-c received");
            handle.shutdown();
        }
    });

    producer.run(LoremGenerator::new()).await?;
    Ok(())
}
