/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Text could not be decoded by a symbol codec.
    #[error("invalid symbol text '{text}': {reason}")]
    InvalidSymbol { text: String, reason: String },

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An argument was rejected.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The requested shape or operation has no implementation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A bounded container is full.
    #[error("{what} capacity exceeded (max {max})")]
    CapacityExceeded { what: &'static str, max: usize },

    /// A numeric value does not fit the requested width.
    #[error("value {value} out of range for {target}")]
    Overflow { value: i64, target: &'static str },

    /// The next value has a different type than requested.
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: String,
    },

    /// The encoded input is truncated or malformed.
    #[error("malformed input at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// An I/O error occurred in an output adapter.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
