use stageloop_db::{tables, ChainReader, DbTxMut};
use stageloop_interfaces::{
    consensus::ConsensusError,
    p2p::{BodyDownloader, PenaltyKind, WithPeerId},
};
use stageloop_primitives::{SealedBlock, StageCheckpoint};
use stageloop_stages_api::{
    BlockErrorKind, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The body stage downloads block bodies for the canonical headers.
///
/// Each body is checked against the transactions root of its header before it is written to
/// [`tables::BlockBodies`]. A mismatching body is attributed to the block, which is reported
/// as bad, and the peer that served it is penalized.
#[derive(Debug)]
pub struct BodyStage<D> {
    /// The body downloader.
    downloader: D,
    /// Maximum number of bodies to write before the progress is committed.
    commit_threshold: u64,
}

impl<D> BodyStage<D> {
    /// Create new bodies stage.
    pub fn new(downloader: D, commit_threshold: u64) -> Self {
        Self { downloader, commit_threshold: commit_threshold.max(1) }
    }
}

impl<Tx: DbTxMut, D: BodyDownloader> Stage<Tx> for BodyStage<D> {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::Bodies
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Headers]
    }

    /// Download block bodies from the last checkpoint for this stage up until the latest synced
    /// header, limited by the stage's batch size.
    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }

        let (range, is_final_range) = input.next_block_range_with_threshold(self.commit_threshold);
        let headers = range
            .clone()
            .map(|number| {
                tx.canonical_header(number)?
                    .ok_or(StageError::MissingBlockData { what: "canonical header", number })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target: "sync::stages::bodies", ?range, "Downloading bodies");
        let bodies = self.downloader.download_bodies(&headers)?;

        let mut progress = input.checkpoint().block_number;
        for (header, WithPeerId(peer, body)) in headers.into_iter().zip(bodies) {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }

            let block = SealedBlock::new(header, body);
            if let Err((got, expected)) = block.ensure_transaction_root_valid() {
                warn!(target: "sync::stages::bodies", %peer, number = block.number, %got, %expected, "Body does not match its header");
                self.downloader.penalize(peer, PenaltyKind::BadBlock);
                let (header, _) = block.split();
                return Err(StageError::Block {
                    block: Box::new(header),
                    error: BlockErrorKind::Validation(ConsensusError::BodyTransactionRootDiff {
                        got,
                        expected,
                    }),
                })
            }

            let (header, body) = block.split();
            tx.put::<tables::BlockBodies>(header.number, body)?;
            progress = header.number;
        }

        info!(target: "sync::stages::bodies", progress, target = input.target, "Wrote bodies");
        let checkpoint = StageCheckpoint::new(progress);
        if progress == *range.end() && !is_final_range {
            Ok(ExecOutput::in_progress(checkpoint))
        } else {
            Ok(ExecOutput::done(checkpoint))
        }
    }

    /// Unwind the stage.
    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        let removed = tx.delete_range::<tables::BlockBodies, _>(input.unwind_to + 1..)?;
        debug!(target: "sync::stages::bodies", unwind_to = input.unwind_to, removed, "Unwound bodies");
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }
}
