#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The message database document could not be parsed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The message database parsed but is not usable.
    #[error("invalid message database: {0}")]
    Database(String),

    /// Destination buffer cannot hold the output. The caller may retry with a larger buffer.
    #[error("buffer full: {needed} bytes needed, {capacity} available")]
    BufferFull { needed: usize, capacity: usize },

    /// Frame header could not be mapped through the message database.
    #[error("header decode failed: {0}")]
    HeaderDecode(String),

    /// Frame body could not be mapped through the message definition.
    #[error("message decode failed: {0}")]
    MessageDecode(String),

    /// A decoded value cannot be represented in the requested target format.
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("no definition for message {0}")]
    NoDefinition(String),

    #[error("no message database loaded")]
    NoDatabase,

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Input is recognizable but has unexpected formatting.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Schema or programming contract violation, e.g., a field width that does not match its
    /// declared data type. Never caused by malformed input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for contract violations that indicate a schema or programming defect rather than bad
    /// input data. These should not be retried.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    /// True when the caller can retry the same call with a larger output buffer.
    #[must_use]
    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Error::BufferFull { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
