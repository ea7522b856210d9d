//! Error types for the streaming engine.

use crate::dvb::tuning::DeliverySystem;

/// Errors that can occur in the streaming engine.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io) — socket or DVR device failures.
/// - **Admission**: [`SessionNotFound`](Self::SessionNotFound),
///   [`NoFreeClientSlot`](Self::NoFreeClientSlot),
///   [`StreamDisabled`](Self::StreamDisabled),
///   [`UnsupportedDeliverySystem`](Self::UnsupportedDeliverySystem).
/// - **Tuning**: [`TuneFailed`](Self::TuneFailed) — the frontend refused
///   the requested parameters; the stream returns to idle.
/// - **Lifecycle**: [`ProducerNotRunning`](Self::ProducerNotRunning),
///   [`ThreadSpawn`](Self::ThreadSpawn) — fatal to the stream, never the
///   process.
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP request text.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O error on a socket or the DVR device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No client slot carries the given RTSP session ID.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// All [`MAX_CLIENTS`](crate::stream::MAX_CLIENTS) slots are occupied.
    #[error("no free client slot")]
    NoFreeClientSlot,

    /// The stream is administratively disabled and refuses new sessions.
    #[error("stream {0} is disabled")]
    StreamDisabled(usize),

    /// The frontend cannot handle the requested delivery system
    /// (`msys=` in SAT>IP terms).
    #[error("frontend not capable of handling {0}")]
    UnsupportedDeliverySystem(DeliverySystem),

    /// The frontend refused the requested tuning parameters.
    #[error("tuning failed: {0}")]
    TuneFailed(String),

    /// A producer operation was requested while its thread is not running.
    #[error("RTP producer is not running")]
    ProducerNotRunning,

    /// Spawning the producer or RTCP thread failed.
    #[error("failed to spawn {0} thread")]
    ThreadSpawn(&'static str),

    /// Failed to parse an RTSP request message.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
