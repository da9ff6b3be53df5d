use crate::BridgeError;
use stageloop_primitives::BlockHash;
use std::time::Duration;
use tokio::sync::oneshot;

/// Head, safe and finalized block hashes chosen by the consensus client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkchoiceState {
    /// Hash of the head block.
    pub head: BlockHash,
    /// Hash of the safe block.
    pub safe: BlockHash,
    /// Hash of the finalized block.
    pub finalized: BlockHash,
}

/// Validity of a payload or fork choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatusKind {
    /// The cycle ended on the requested block.
    Valid,
    /// The requested block was rejected.
    Invalid,
    /// The requested block is not known yet and is being downloaded.
    Syncing,
    /// The cycle failed.
    Error,
}

/// Answer to a payload or fork choice request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadStatus {
    /// Outcome.
    pub kind: PayloadStatusKind,
    /// Hash of the most recent valid block, if known.
    pub latest_valid_hash: Option<BlockHash>,
    /// Failure detail for [`PayloadStatusKind::Error`] and [`PayloadStatusKind::Invalid`].
    pub error: Option<String>,
}

impl PayloadStatus {
    /// Creates a status without error detail.
    pub const fn new(kind: PayloadStatusKind, latest_valid_hash: Option<BlockHash>) -> Self {
        Self { kind, latest_valid_hash, error: None }
    }

    /// Attaches error detail.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns `true` for [`PayloadStatusKind::Valid`].
    pub fn is_valid(&self) -> bool {
        self.kind == PayloadStatusKind::Valid
    }
}

pub(crate) type StatusSender = oneshot::Sender<Result<PayloadStatus, BridgeError>>;

/// Receiver side of a submitted request.
#[derive(Debug)]
#[must_use = "the status is lost if the receiver is dropped"]
pub struct PendingStatus {
    rx: oneshot::Receiver<Result<PayloadStatus, BridgeError>>,
}

impl PendingStatus {
    pub(crate) fn channel() -> (StatusSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Waits until a cycle resolves the request.
    pub async fn await_status(self) -> Result<PayloadStatus, BridgeError> {
        self.rx.await.map_err(|_| BridgeError::Closed)?
    }

    /// Waits until a cycle resolves the request, giving up after `timeout`.
    pub async fn await_status_timeout(self, timeout: Duration) -> Result<PayloadStatus, BridgeError> {
        tokio::time::timeout(timeout, self.await_status()).await.map_err(|_| BridgeError::Timeout)?
    }

    /// Returns the status if the request was already resolved.
    pub fn try_status(&mut self) -> Option<Result<PayloadStatus, BridgeError>> {
        match self.rx.try_recv() {
            Ok(status) => Some(status),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BridgeError::Closed)),
        }
    }
}
