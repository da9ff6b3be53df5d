use crate::p2p::{DownloadResult, Penalize, WithPeerId};
use stageloop_primitives::{BlockNumber, SealedHeader};
use std::fmt::Debug;

/// Supplies headers of the best chain known to the network.
#[auto_impl::auto_impl(&, Arc)]
pub trait HeaderDownloader: Penalize + Debug {
    /// Headers of the best chain in `[start, end]`, ascending.
    ///
    /// May return fewer headers than requested, starting at `start`, when the rest is not
    /// available yet.
    fn download_headers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> DownloadResult<Vec<WithPeerId<SealedHeader>>>;

    /// Header of the best chain at `number`, used to locate the fork point when the downloaded
    /// chain does not attach to the local one.
    fn header_by_number(&self, number: BlockNumber) -> DownloadResult<Option<SealedHeader>>;
}
