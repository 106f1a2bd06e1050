/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the length prefix or the configured cap.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The message codec rejected a payload.
    #[error("message decode failed: {0}")]
    Decode(String),

    /// The message codec could not serialize a message.
    #[error("message encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
