//! Line-oriented load-feed transport: a producer (client) that floods a
//! receiver (server) with generated text lines over TCP, plus the receiver
//! side that fans messages in from any number of producers and forwards them
//! to a downstream sink.
//!
//! The wire protocol is textual and line-delimited. Two reserved command
//! strings travel in-band on the data channel: one disconnects a single
//! producer, the other shuts the whole receiver down and tells every
//! connected producer to stop.

pub mod config;
pub mod error;
pub mod producer;
pub mod protocol;
pub mod receiver;
pub mod registry;

pub use config::Config;
pub use error::TransportError;
pub use producer::{DataProducer, Generator, ProducerHandle, RetryDecision, RetryPolicy};
pub use protocol::{Message, MAX_FRAME_LENGTH};
pub use receiver::{DataReceiver, MessageSink};
pub use registry::{ConnectionId, ConnectionRegistry};
