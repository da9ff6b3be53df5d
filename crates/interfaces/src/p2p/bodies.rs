use crate::p2p::{DownloadResult, Penalize, WithPeerId};
use stageloop_primitives::{BlockBody, SealedHeader};
use std::fmt::Debug;

/// Supplies block bodies for known headers.
#[auto_impl::auto_impl(&, Arc)]
pub trait BodyDownloader: Penalize + Debug {
    /// Bodies for the given headers, in the same order. Fewer bodies than headers may be
    /// returned if the tail is not available yet.
    fn download_bodies(&self, headers: &[SealedHeader])
        -> DownloadResult<Vec<WithPeerId<BlockBody>>>;
}
