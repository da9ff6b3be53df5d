use stageloop_primitives::{BlockHash, SealedBlock};
use std::fmt::Debug;

/// Receives blocks and heads announced by a proof-of-stake consensus client so that the next
/// cycle can download them.
#[auto_impl::auto_impl(&, Arc)]
pub trait PayloadSink: Send + Sync + Debug {
    /// Makes a candidate block available to the header and body downloaders.
    fn insert_payload(&self, block: SealedBlock);

    /// Requests the chain ending at an unknown head.
    fn request_head(&self, head: BlockHash);
}
