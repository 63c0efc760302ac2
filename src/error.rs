use tokio_util::codec::LinesCodecError;

use crate::protocol::MAX_FRAME_LENGTH;

/// Error taxonomy of the transport layer.
///
/// Connection-scoped failures (`FrameTooLong`, `Io`) are fatal only to the
/// affected connection; the connect variants are fatal to the producer that
/// was trying to start up.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The producer ran out of connection attempts.
    #[error("gave up connecting after {attempts} attempts")]
    ConnectExhausted { attempts: u32 },

    /// The connect-retry loop was cancelled from outside while waiting.
    #[error("connect retry cancelled")]
    ConnectCancelled,

    /// Inbound bytes exceeded the maximum frame size without a delimiter.
    #[error("frame exceeded {} bytes without a delimiter", MAX_FRAME_LENGTH)]
    FrameTooLong,

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, rejected eagerly rather than coerced.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLong,
            LinesCodecError::Io(err) => TransportError::Io(err),
        }
    }
}
