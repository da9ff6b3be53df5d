/// Reasons a submitted request resolves without a status.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// A newer request took the pending slot.
    #[error("request superseded by a newer one")]
    Superseded,
    /// No cycle resolved the request in time.
    #[error("timed out waiting for the sync cycle")]
    Timeout,
    /// The bridge was dropped.
    #[error("payload bridge closed")]
    Closed,
}
