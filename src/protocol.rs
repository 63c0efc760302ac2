//! Wire vocabulary shared by both sides: the bounded line codec and the
//! classification of received lines into data and control messages.

use tokio_util::codec::LinesCodec;

/// Maximum frame size in bytes. A line growing past this without a delimiter
/// closes the connection.
pub const MAX_FRAME_LENGTH: usize = 8192;

pub const SHUTDOWN_COMMAND: &str = "streams_command_shutdown";
pub const DISCONNECT_COMMAND: &str = "streams_command_disconnect";

/// Closing notice written to a producer before its connection is dropped.
pub const CLOSING_NOTICE: &str = "Disconnected";

/// Build the codec used on every connection, producer and receiver alike.
/// Decoded lines come out delimiter-stripped; encoding appends the delimiter.
pub fn line_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)
}

/// A received line, already classified. This is the single dispatch point for
/// the in-band control vocabulary; nothing else compares command strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ordinary payload line, forwarded to the sink.
    Data(String),
    /// Shut the whole receiver (or the producer session) down.
    Shutdown,
    /// Close only the connection the command arrived on.
    Disconnect,
}

impl Message {
    /// Control strings match case-insensitively against the full line.
    pub fn classify(line: String) -> Self {
        if line.eq_ignore_ascii_case(SHUTDOWN_COMMAND) {
            Message::Shutdown
        } else if line.eq_ignore_ascii_case(DISCONNECT_COMMAND) {
            Message::Disconnect
        } else {
            Message::Data(line)
        }
    }
}
