/// Failure reported by a transport.
///
/// The dispatcher retries `Transient` with backoff and fails the record on
/// `Permanent` without retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Timeouts, unavailable broker, dropped connection.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Rejected message, unknown destination, malformed payload.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryError::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryError::Permanent(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            DeliveryError::Transient(reason) | DeliveryError::Permanent(reason) => reason,
        }
    }
}
