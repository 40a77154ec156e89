/// Failure of the processed-id backing store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessedIdStoreError {
    #[error("processed-id store lock poisoned during {0}")]
    Poisoned(&'static str),

    #[error("processed-id store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the idempotency guard itself.
///
/// The guard fails closed: none of these ever means "not processed yet".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Store(#[from] ProcessedIdStoreError),

    #[error("message id must not be empty")]
    EmptyMessageId,

    #[error("in-flight claim set poisoned")]
    ClaimsPoisoned,
}

/// Error from [`IdempotencyGuard::handle`](super::IdempotencyGuard::handle).
#[derive(Debug, thiserror::Error)]
pub enum HandleError<E> {
    /// The guard could not decide or could not record; redeliver.
    #[error("idempotency guard failed: {0}")]
    Guard(#[from] GuardError),

    /// The business handler failed; nothing was recorded, so a redelivery runs it again.
    #[error("handler failed: {0}")]
    Handler(E),
}
