//! Producer (client) side: connect to the receiver with bounded retry, then
//! emit generated lines at a configured rate until told to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::protocol::{line_codec, Message};

/// Source of payload lines, one per call. Supplied by the caller; the
/// transport puts no constraint on content beyond the frame size limit.
pub trait Generator: Send {
    fn next_line(&mut self) -> String;
}

/// Bounded-retry schedule for connection establishment, kept separate from
/// the socket I/O so it can be exercised with zero real delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// The attempt budget is spent.
    GiveUp,
}

impl RetryPolicy {
    /// Decide what to do after `attempts_made` failed connection attempts.
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.backoff)
        }
    }
}

/// Cloneable handle used to stop a running producer from another task (or a
/// ctrl-c hook). Stopping twice is a no-op.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ProducerHandle {
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Shutting down producer");
        }
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One producer session: target address, emission rate and the running flag.
///
/// The session is single-task: connecting blocks it for the whole retry
/// duration, and afterwards the same task paces emissions and watches the
/// connection for an in-band shutdown command from the receiver.
#[derive(Debug)]
pub struct DataProducer {
    host: String,
    port: u16,
    rate: u32,
    policy: RetryPolicy,
    handle: ProducerHandle,
}

impl DataProducer {
    /// Create a session. A rate of zero messages per second is a
    /// configuration error, never clamped.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        messages_per_second: u32,
    ) -> Result<Self, TransportError> {
        if messages_per_second == 0 {
            return Err(TransportError::Config(
                "messages per second must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            host: host.into(),
            port,
            rate: messages_per_second,
            policy: RetryPolicy::default(),
            handle: ProducerHandle {
                running: Arc::new(AtomicBool::new(true)),
                cancel: CancellationToken::new(),
            },
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> ProducerHandle {
        self.handle.clone()
    }

    /// Establish the outbound connection, retrying per the policy. Resolves
    /// to the stream, `ConnectExhausted` or `ConnectCancelled`.
    async fn connect(&self) -> Result<TcpStream, TransportError> {
        tracing::info!("Connecting to {}:{}", self.host, self.port);
        let mut attempts = 0u32;
        loop {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    attempts += 1;
                    match self.policy.decide(attempts) {
                        RetryDecision::GiveUp => {
                            tracing::warn!("Giving up after {} attempts: {}", attempts, err);
                            return Err(TransportError::ConnectExhausted { attempts });
                        }
                        RetryDecision::Retry(backoff) => {
                            tracing::warn!(
                                "[{}/{}] Failed to connect ({}), retrying in {}s",
                                attempts,
                                self.policy.max_attempts,
                                err,
                                backoff.as_secs()
                            );
                            tokio::select! {
                                _ = self.handle.cancel.cancelled() => {
                                    return Err(TransportError::ConnectCancelled);
                                }
                                _ = sleep(backoff) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Connect, then run the emission loop until the running flag clears,
    /// the peer orders a shutdown, or the connection fails. A failed write
    /// stops emission; it does not abort the process.
    pub async fn run<G: Generator>(self, mut generator: G) -> Result<(), TransportError> {
        let stream = self.connect().await?;
        tracing::info!("Connected to {}:{}", self.host, self.port);

        let mut framed = Framed::new(stream, line_codec());
        let mut ticker = interval(emission_period(self.rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.handle.is_running() {
            tokio::select! {
                _ = self.handle.cancel.cancelled() => {
                    self.handle.shutdown();
                }
                inbound = framed.next() => match inbound {
                    Some(Ok(line)) => match Message::classify(line) {
                        Message::Shutdown => {
                            tracing::info!("Shutdown requested by receiver");
                            self.handle.shutdown();
                        }
                        Message::Data(line) => tracing::debug!("Received message: {}", line),
                        Message::Disconnect => {}
                    },
                    Some(Err(err)) => {
                        tracing::warn!("Read failed, disconnecting: {}", TransportError::from(err));
                        break;
                    }
                    None => {
                        tracing::info!("Receiver closed the connection");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let line = generator.next_line();
                    tracing::debug!("String created: {}", line);
                    if let Err(err) = framed.send(line).await {
                        tracing::warn!("Write failed, disconnecting: {}", TransportError::from(err));
                        break;
                    }
                }
            }
        }

        // Covers every exit path; shutting down twice is a no-op. Dropping
        // the framed stream closes the connection.
        self.handle.shutdown();
        Ok(())
    }
}

/// Interval between emissions, in nanosecond precision so rates above
/// 1000/s still get a non-zero tick. `rate` is validated non-zero at
/// construction.
fn emission_period(rate: u32) -> Duration {
    Duration::from_secs(1) / rate
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::*;

    struct CountingGenerator(u64);

    impl Generator for CountingGenerator {
        fn next_line(&mut self) -> String {
            self.0 += 1;
            format!("line {}", self.0)
        }
    }

    #[test]
    fn retry_policy_decisions() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        };
        assert_eq!(policy.decide(1), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(policy.decide(2), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn emission_period_is_the_rate_inverse() {
        assert_eq!(emission_period(1), Duration::from_secs(1));
        assert_eq!(emission_period(5), Duration::from_millis(200));
        assert_eq!(emission_period(1000), Duration::from_millis(1));
        // Rates past one per millisecond keep a non-zero period.
        assert_eq!(emission_period(2000), Duration::from_micros(500));
        assert!(emission_period(1_000_000) > Duration::ZERO);
    }

    #[test]
    fn zero_rate_is_a_configuration_error() {
        let err = DataProducer::new("localhost", 4000, 0).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[tokio::test]
    async fn unreachable_target_exhausts_the_attempt_budget() {
        // Port 1 on loopback refuses immediately on any sane test host.
        let producer = DataProducer::new("127.0.0.1", 1, 1)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            });
        let err = timeout(Duration::from_secs(5), producer.connect())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectExhausted { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_retry_wait() {
        let producer = DataProducer::new("127.0.0.1", 1, 1)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 100,
                backoff: Duration::from_secs(60),
            });
        let handle = producer.handle();
        let task = tokio::spawn(async move { producer.connect().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();

        let err = timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectCancelled));
    }

    #[tokio::test]
    async fn stops_emitting_once_the_running_flag_clears() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = DataProducer::new(addr.ip().to_string(), addr.port(), 500).unwrap();
        let handle = producer.handle();
        let task = tokio::spawn(producer.run(CountingGenerator(0)));

        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, line_codec());
        assert!(frames.next().await.unwrap().is_ok());

        handle.shutdown();
        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!handle.is_running());
        // Shutting down again must stay a no-op.
        handle.shutdown();
    }

    #[tokio::test]
    async fn high_rates_emit_without_panicking() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = DataProducer::new(addr.ip().to_string(), addr.port(), 2000).unwrap();
        let handle = producer.handle();
        let task = tokio::spawn(producer.run(CountingGenerator(0)));

        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, line_codec());
        for _ in 0..5 {
            assert!(frames.next().await.unwrap().is_ok());
        }

        handle.shutdown();
        // A clean join means the session task never panicked.
        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn paces_emissions_to_the_configured_rate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = DataProducer::new(addr.ip().to_string(), addr.port(), 5).unwrap();
        let handle = producer.handle();
        let task = tokio::spawn(producer.run(CountingGenerator(0)));

        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, line_codec());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut received = 0u32;
        loop {
            match tokio::time::timeout_at(deadline, frames.next()).await {
                Ok(Some(Ok(_))) => received += 1,
                Ok(_) => panic!("connection ended early"),
                Err(_) => break,
            }
        }
        // Ticks land at 0 ms, 200 ms, ... so a one-second window holds at
        // most six frames; scheduling delay only pushes frames later.
        assert!(received <= 6, "received {} frames in one second", received);
        assert!(received >= 2);

        handle.shutdown();
        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stops_when_the_receiver_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = DataProducer::new(addr.ip().to_string(), addr.port(), 500).unwrap();
        let handle = producer.handle();
        let task = tokio::spawn(producer.run(CountingGenerator(0)));

        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn remote_shutdown_command_stops_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = DataProducer::new(addr.ip().to_string(), addr.port(), 500).unwrap();
        let handle = producer.handle();
        let task = tokio::spawn(producer.run(CountingGenerator(0)));

        let (stream, _) = listener.accept().await.unwrap();
        let mut frames = Framed::new(stream, line_codec());
        frames
            .send(crate::protocol::SHUTDOWN_COMMAND.to_string())
            .await
            .unwrap();

        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!handle.is_running());
    }
}
