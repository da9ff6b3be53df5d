use stageloop_db::{tables, BlockNumberAddress, DbTxMut};
use stageloop_primitives::{keccak256, Address, StageCheckpoint};
use stageloop_stages_api::{
    ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The account hashing stage mirrors [`tables::PlainState`] into [`tables::HashedAccounts`],
/// keyed by the hash of the address.
///
/// Only accounts listed in the change sets of the processed blocks are touched.
#[derive(Clone, Copy, Debug)]
pub struct AccountHashingStage {
    /// The number of blocks after which the control flow will be returned to the pipeline for
    /// commit.
    pub commit_threshold: u64,
}

impl Default for AccountHashingStage {
    fn default() -> Self {
        Self { commit_threshold: 100_000 }
    }
}

impl AccountHashingStage {
    /// Create new instance of [`AccountHashingStage`].
    pub const fn new(commit_threshold: u64) -> Self {
        Self { commit_threshold }
    }
}

impl<Tx: DbTxMut> Stage<Tx> for AccountHashingStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::HashState
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Execution]
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }

        let (range, is_final_range) =
            input.next_block_range_with_threshold(self.commit_threshold.max(1));
        let changed = tx
            .walk_range::<tables::AccountChangeSets, _>(
                BlockNumberAddress((*range.start(), Address::ZERO))..
                    BlockNumberAddress((range.end() + 1, Address::ZERO)),
            )?
            .into_iter()
            .map(|(key, _)| key.address())
            .collect::<BTreeSet<_>>();

        for address in &changed {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            match tx.get::<tables::PlainState>(*address)? {
                Some(account) => tx.put::<tables::HashedAccounts>(keccak256(address), account)?,
                None => {
                    tx.delete::<tables::HashedAccounts>(keccak256(address))?;
                }
            }
        }
        debug!(target: "sync::stages::hashing_account", ?range, accounts = changed.len(), "Hashed accounts");

        let checkpoint = StageCheckpoint::new(*range.end());
        Ok(if is_final_range {
            ExecOutput::done(checkpoint)
        } else {
            ExecOutput::in_progress(checkpoint)
        })
    }

    /// Restores every account changed above the target to its value before the first change.
    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        let mut restored = BTreeMap::new();
        for (key, prior) in tx
            .walk_range::<tables::AccountChangeSets, _>(
                BlockNumberAddress((input.unwind_to + 1, Address::ZERO))..,
            )?
        {
            restored.entry(key.address()).or_insert(prior);
        }

        for (address, prior) in &restored {
            let hashed = keccak256(address);
            if prior.is_empty() {
                tx.delete::<tables::HashedAccounts>(hashed)?;
            } else {
                tx.put::<tables::HashedAccounts>(hashed, *prior)?;
            }
        }
        debug!(target: "sync::stages::hashing_account", unwind_to = input.unwind_to, accounts = restored.len(), "Unwound hashed accounts");

        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }
}
