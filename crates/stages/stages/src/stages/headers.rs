use stageloop_db::{tables, ChainReader, DbTxMut};
use stageloop_interfaces::{
    consensus::Consensus,
    p2p::{HeaderDownloader, PenaltyKind, WithPeerId},
};
use stageloop_primitives::{BlockNumber, SealedHeader, StageCheckpoint};
use stageloop_stages_api::{
    BlockErrorKind, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The headers stage.
///
/// The headers stage downloads all block headers from the highest block in the local database
/// up to the highest block seen on the network, validates them against their parent and writes
/// them together with the canonical hash mapping and the total difficulty.
///
/// Headers that were previously marked bad are never written again: the peer serving them is
/// penalized and the stage stops below them.
///
/// If the first downloaded header does not attach to the local head, the stage locates the
/// highest block shared with the network's chain and reports [`StageError::DetachedHead`] so
/// that the pipeline unwinds to it.
#[derive(Debug)]
pub struct HeaderStage<D> {
    /// Strategy for downloading the headers
    downloader: D,
    /// Consensus client implementation
    consensus: Arc<dyn Consensus>,
    /// Maximum number of headers to write before the progress is committed.
    commit_threshold: u64,
}

impl<D> HeaderStage<D> {
    /// Create a new header stage
    pub fn new(downloader: D, consensus: Arc<dyn Consensus>, commit_threshold: u64) -> Self {
        Self { downloader, consensus, commit_threshold: commit_threshold.max(1) }
    }
}

impl<D: HeaderDownloader> HeaderStage<D> {
    /// Highest block of the local canonical chain that the network's chain also contains.
    fn find_fork_point<Tx: ChainReader>(
        &self,
        tx: &Tx,
        local_head: BlockNumber,
    ) -> Result<BlockNumber, StageError> {
        for number in (0..=local_head).rev() {
            let Some(remote) = self.downloader.header_by_number(number)? else { continue };
            if tx.canonical_hash(number)? == Some(remote.hash()) {
                return Ok(number)
            }
        }
        Err(StageError::fatal("downloaded chain does not share the local genesis"))
    }

    fn write_header<Tx: DbTxMut>(
        tx: &Tx,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), StageError> {
        let parent_td = tx.header_td(parent.hash())?.ok_or(StageError::MissingBlockData {
            what: "total difficulty",
            number: parent.number,
        })?;
        tx.put::<tables::Headers>(header.hash(), header.header().clone())?;
        tx.put::<tables::HeaderTD>(header.hash(), parent_td + header.difficulty)?;
        tx.put::<tables::CanonicalHeaders>(header.number, header.hash())?;
        Ok(())
    }
}

impl<Tx: DbTxMut, D: HeaderDownloader> Stage<Tx> for HeaderStage<D> {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::Headers
    }

    /// Download the headers in batches of at most `commit_threshold` blocks.
    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        let checkpoint = input.checkpoint();
        if input.target_reached() {
            return Ok(ExecOutput::done(checkpoint))
        }

        let local_head = tx.canonical_header(checkpoint.block_number)?.ok_or(
            StageError::MissingBlockData {
                what: "canonical header",
                number: checkpoint.block_number,
            },
        )?;
        let (range, is_final_range) = input.next_block_range_with_threshold(self.commit_threshold);
        debug!(target: "sync::stages::headers", from = range.start(), to = range.end(), "Downloading headers");

        let downloaded = self.downloader.download_headers(*range.start(), *range.end())?;

        let mut parent = local_head;
        for WithPeerId(peer, header) in downloaded {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }

            if header.number != parent.number + 1 {
                warn!(target: "sync::stages::headers", %peer, number = header.number, expected = parent.number + 1, "Received header out of order");
                self.downloader.penalize(peer, PenaltyKind::BadResponse);
                break
            }

            if tx.is_bad_header(header.hash())? {
                warn!(target: "sync::stages::headers", %peer, number = header.number, hash = %header.hash(), "Received known bad header");
                self.downloader.penalize(peer, PenaltyKind::BadHeader);
                break
            }

            if header.parent_hash != parent.hash() {
                if parent.number == checkpoint.block_number {
                    let fork_point = self.find_fork_point(tx, checkpoint.block_number)?;
                    return Err(StageError::DetachedHead {
                        local_head: Box::new(parent),
                        header: Box::new(header),
                        fork_point,
                    })
                }
                warn!(target: "sync::stages::headers", %peer, number = header.number, "Received header that does not extend the batch");
                self.downloader.penalize(peer, PenaltyKind::BadResponse);
                break
            }

            if let Err(error) = self.consensus.validate_header(&header, &parent) {
                error!(target: "sync::stages::headers", %peer, number = header.number, %error, "Header validation failed");
                self.downloader.penalize(peer, PenaltyKind::BadBlock);
                return Err(StageError::Block {
                    block: Box::new(header),
                    error: BlockErrorKind::Validation(error),
                })
            }

            Self::write_header(tx, &header, &parent)?;
            parent = header;
        }

        let reached = parent.number;
        let checkpoint = StageCheckpoint::new(reached).with_block_hash(parent.hash());
        info!(target: "sync::stages::headers", progress = reached, target = input.target, "Wrote headers");

        // A short response means the rest is not available yet.
        if reached == *range.end() && !is_final_range {
            Ok(ExecOutput::in_progress(checkpoint))
        } else {
            Ok(ExecOutput::done(checkpoint))
        }
    }

    /// Drop the canonical mapping of the unwound headers. The headers themselves are kept as
    /// side-chain headers. The bad block, if any, is recorded so it is not downloaded again.
    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        let removed = tx.delete_range::<tables::CanonicalHeaders, _>(input.unwind_to + 1..)?;
        if let Some(bad_block) = input.bad_block {
            let number = match tx.header(bad_block)? {
                Some(header) => header.number,
                None => input.unwind_to + 1,
            };
            tx.put::<tables::BadHeaders>(bad_block, number)?;
        }
        debug!(target: "sync::stages::headers", unwind_to = input.unwind_to, removed, bad_block = ?input.bad_block, "Unwound headers");

        let hash = tx.canonical_hash(input.unwind_to)?.ok_or(StageError::MissingBlockData {
            what: "canonical hash",
            number: input.unwind_to,
        })?;
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to).with_block_hash(hash) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestChain, TestDownloader};
    use assert_matches::assert_matches;
    use stageloop_db::{Database, DbTx, MemoryDatabase};
    use stageloop_interfaces::test_utils::TestConsensus;
    use stageloop_primitives::U256;

    fn setup(chain: &TestChain) -> (MemoryDatabase, Arc<TestDownloader>, Arc<TestConsensus>) {
        let db = MemoryDatabase::new();
        chain.insert_genesis(&db);
        (db, Arc::new(TestDownloader::new(chain.clone())), Arc::new(TestConsensus::default()))
    }

    fn input(checkpoint: BlockNumber, target: BlockNumber) -> ExecInput {
        ExecInput {
            target,
            checkpoint: Some(StageCheckpoint::new(checkpoint)),
            initial_cycle: false,
        }
    }

    #[test]
    fn execute_writes_headers_in_batches() {
        let chain = TestChain::with_blocks(10);
        let (db, downloader, consensus) = setup(&chain);
        let mut stage = HeaderStage::new(downloader, consensus, 4);
        let tx = db.tx_mut().unwrap();
        let cancel = CancellationToken::new();

        let output = stage.execute(&tx, input(0, 10), &cancel).unwrap();
        assert_eq!(
            output,
            ExecOutput::in_progress(StageCheckpoint::new(4).with_block_hash(chain.block(4).hash()))
        );

        let output = stage.execute(&tx, input(4, 10), &cancel).unwrap();
        assert!(!output.done);
        let output = stage.execute(&tx, input(8, 10), &cancel).unwrap();
        assert!(output.done);
        assert_eq!(output.checkpoint.block_number, 10);

        for block in chain.blocks() {
            assert_eq!(tx.canonical_hash(block.number).unwrap(), Some(block.hash()));
        }
        let td = tx.header_td(chain.tip().hash()).unwrap().unwrap();
        let expected = chain.blocks().iter().fold(U256::ZERO, |td, block| td + block.difficulty);
        assert_eq!(td, expected);
    }

    #[test]
    fn execute_stops_at_short_response() {
        let chain = TestChain::with_blocks(5);
        let (db, downloader, consensus) = setup(&chain);
        let mut stage = HeaderStage::new(downloader, consensus, 100);
        let tx = db.tx_mut().unwrap();

        let output = stage.execute(&tx, input(0, 20), &CancellationToken::new()).unwrap();
        assert_eq!(
            output,
            ExecOutput::done(StageCheckpoint::new(5).with_block_hash(chain.tip().hash()))
        );
    }

    #[test]
    fn execute_skips_bad_headers() {
        let chain = TestChain::with_blocks(5);
        let (db, downloader, consensus) = setup(&chain);
        let mut stage = HeaderStage::new(downloader.clone(), consensus, 100);
        let tx = db.tx_mut().unwrap();
        tx.put::<tables::BadHeaders>(chain.block(3).hash(), 3).unwrap();

        let output = stage.execute(&tx, input(0, 5), &CancellationToken::new()).unwrap();
        assert_eq!(
            output,
            ExecOutput::done(StageCheckpoint::new(2).with_block_hash(chain.block(2).hash()))
        );
        assert_eq!(downloader.penalties(), vec![(TestDownloader::PEER, PenaltyKind::BadHeader)]);
    }

    #[test]
    fn execute_reports_invalid_header() {
        let chain = TestChain::with_blocks(5);
        let (db, downloader, consensus) = setup(&chain);
        consensus.reject_header(chain.block(2).hash());
        let mut stage = HeaderStage::new(downloader.clone(), consensus, 100);
        let tx = db.tx_mut().unwrap();

        let result = stage.execute(&tx, input(0, 5), &CancellationToken::new());
        assert_matches!(
            result,
            Err(StageError::Block { block, error: BlockErrorKind::Validation(_) }) if block.number == 2
        );
        assert_eq!(downloader.penalties(), vec![(TestDownloader::PEER, PenaltyKind::BadBlock)]);
    }

    #[test]
    fn execute_detects_detached_head() {
        let chain = TestChain::with_blocks(6);
        let fork = chain.fork(3, 5);
        let (db, downloader, consensus) = setup(&chain);
        let mut stage = HeaderStage::new(downloader.clone(), consensus, 100);
        let cancel = CancellationToken::new();
        let tx = db.tx_mut().unwrap();

        stage.execute(&tx, input(0, 6), &cancel).unwrap();
        downloader.set_chain(fork);

        let result = stage.execute(&tx, input(6, 8), &cancel);
        assert_matches!(
            result,
            Err(StageError::DetachedHead { fork_point: 3, local_head, .. }) if local_head.number == 6
        );
    }

    #[test]
    fn unwind_removes_canonical_mapping_and_records_bad_block() {
        let chain = TestChain::with_blocks(5);
        let (db, downloader, consensus) = setup(&chain);
        let mut stage = HeaderStage::new(downloader, consensus, 100);
        let cancel = CancellationToken::new();
        let tx = db.tx_mut().unwrap();
        stage.execute(&tx, input(0, 5), &cancel).unwrap();

        let bad = chain.block(4).hash();
        let output = stage
            .unwind(
                &tx,
                UnwindInput {
                    checkpoint: StageCheckpoint::new(5),
                    unwind_to: 3,
                    bad_block: Some(bad),
                },
                &cancel,
            )
            .unwrap();

        assert_eq!(
            output.checkpoint,
            StageCheckpoint::new(3).with_block_hash(chain.block(3).hash())
        );
        assert_eq!(tx.canonical_hash(4).unwrap(), None);
        assert!(tx.header(bad).unwrap().is_some());
        assert_eq!(tx.get::<tables::BadHeaders>(bad).unwrap(), Some(4));
    }
}
