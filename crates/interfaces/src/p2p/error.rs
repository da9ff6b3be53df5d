use stageloop_primitives::{BlockHash, BlockNumber};

/// Result alias for [`DownloadError`].
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Download errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// No peer could serve the request.
    #[error("no peer available to serve the request")]
    NoPeers,
    /// Timed out waiting for the response.
    #[error("timed out while waiting for response")]
    Timeout,
    /// A body for the given header is not available.
    #[error("missing body for block {number} ({hash})")]
    MissingBody {
        /// Block number.
        number: BlockNumber,
        /// Block hash.
        hash: BlockHash,
    },
    /// The downloader channel was closed.
    #[error("downloader channel closed")]
    ChannelClosed,
}
