//! Peer-to-peer download traits.

mod bodies;
mod error;
mod headers;

pub use bodies::BodyDownloader;
pub use error::{DownloadError, DownloadResult};
pub use headers::HeaderDownloader;

use stageloop_primitives::B256;
use std::fmt::Debug;

/// Identifier of a remote peer.
pub type PeerId = B256;

/// Wrapper around a value received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithPeerId<T>(pub PeerId, pub T);

impl<T> WithPeerId<T> {
    /// Wraps the value with the peer id.
    pub const fn new(peer: PeerId, value: T) -> Self {
        Self(peer, value)
    }

    /// Get the peer id
    pub const fn peer_id(&self) -> PeerId {
        self.0
    }

    /// Get the underlying data
    pub const fn data(&self) -> &T {
        &self.1
    }

    /// Returns ownership of the underlying data.
    pub fn into_data(self) -> T {
        self.1
    }

    /// Transforms the inner value.
    pub fn transform<F, U>(self, f: F) -> WithPeerId<U>
    where
        F: FnOnce(T) -> U,
    {
        WithPeerId(self.0, f(self.1))
    }
}

/// Reasons for lowering a peer's reputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyKind {
    /// The peer sent a header that was previously found invalid.
    BadHeader,
    /// The peer sent a block that failed validation.
    BadBlock,
    /// The peer sent a response that does not match the request.
    BadResponse,
}

/// Lowers peer reputation.
#[auto_impl::auto_impl(&, Arc)]
pub trait Penalize: Send + Sync {
    /// Report misbehavior of the peer.
    fn penalize(&self, peer: PeerId, kind: PenaltyKind);
}
