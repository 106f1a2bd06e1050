/// Errors surfaced by engine operations.
///
/// None of these are fatal to the engine: each concerns one connection.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error (connect, write, probe).
    #[error("transport error: {0}")]
    Transport(#[from] devlink_transport::TransportError),

    /// Frame-level error (encode, oversized payload).
    #[error("frame error: {0}")]
    Frame(#[from] devlink_frame::FrameError),

    /// No connection is registered under this uuid.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// The connection exists but has no transport handle attached.
    #[error("connection {0} has no transport")]
    NoTransport(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
