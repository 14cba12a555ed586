use thiserror::Error;

/// The broker's error taxonomy. Every variant maps to exactly one
/// `error_code` string that crosses the wire in a failure envelope.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("request body of {0} bytes exceeds the configured limit of {1} bytes")]
    PayloadTooLarge(usize, usize),

    #[error("could not decode request body: {0}")]
    Decoding(String),

    #[error("could not encode response body: {0}")]
    Encoding(String),

    #[error("envelope is missing required field(s): {0}")]
    InvalidEnvelope(String),

    #[error("no handler registered for {0}.{1}")]
    UnknownHandler(String, String),

    #[error("invalid params for {0}.{1}: {2}")]
    InvalidParams(String, String, String),

    #[error("input matched a refused pattern: {0}")]
    SuspiciousInput(String),

    #[error("rate limit exceeded, retry after {0}ms")]
    RateLimited(u64),

    #[error("server under memory/cpu pressure, retry after {0}ms")]
    Overloaded(u64),

    #[error("{0} registry is at capacity")]
    CapacityFull(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("handle {0} is unknown, expired, or already released")]
    InvalidHandle(String),

    #[error("handler returned an error: {0}")]
    Handler(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// The wire `error_code` for this error, per the error taxonomy table.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::PayloadTooLarge(_, _) => "payload_too_large",
            BridgeError::Decoding(_) => "decoding_error",
            BridgeError::Encoding(_) => "encoding_error",
            BridgeError::InvalidEnvelope(_) => "invalid_envelope",
            BridgeError::UnknownHandler(_, _) => "unknown_handler",
            BridgeError::InvalidParams(_, _, _) => "invalid_params",
            BridgeError::SuspiciousInput(_) => "suspicious_input",
            BridgeError::RateLimited(_) => "rate_limited",
            BridgeError::Overloaded(_) => "overloaded",
            BridgeError::CapacityFull(_) => "capacity_full",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::InvalidHandle(_) => "invalid_handle",
            BridgeError::Handler(_) => "handler_error",
            BridgeError::Internal(_) => "internal_error",
        }
    }

    /// Whether a client may reasonably retry this exact request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::RateLimited(_) | BridgeError::Overloaded(_) | BridgeError::Timeout(_)
        )
    }

    /// Milliseconds a client should wait before retrying, when known. A
    /// fixed hint for `CapacityFull` since the concurrency gate itself
    /// carries no notion of a wait time — any admitted request finishing
    /// frees a slot well within this window.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            BridgeError::RateLimited(ms) | BridgeError::Overloaded(ms) => Some(*ms),
            BridgeError::CapacityFull(_) => Some(50),
            _ => None,
        }
    }

    /// Whether this error should also land in the security-event log
    /// channel, separate from ordinary operational logging.
    pub fn is_security_event(&self) -> bool {
        matches!(self, BridgeError::SuspiciousInput(_) | BridgeError::InvalidHandle(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
