use super::Harness;
use crate::{mining_step, Node, NodeError};
use assert_matches::assert_matches;
use stageloop_config::{Config, ConsensusConfig, EngineKind, MiningConfig};
use stageloop_db::{tables, ChainReader, Database, DbTx, MemoryDatabase};
use stageloop_interfaces::{
    consensus::ConsensusError,
    test_utils::{TestConsensus, TestPool},
};
use stageloop_primitives::{
    constants::{ETH_BLOCK_REWARD, INITIAL_BASE_FEE},
    Address, ChainConfig, SealedBlock, TransactionSigned, U256,
};
use stageloop_stages::{
    sets::MiningStages, stages::MiningState, test_utils::TestChain, Pipeline, StageId, StagedSync,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ETHERBASE: Address = Address::repeat_byte(0xee);

fn transfer(signer: Address, nonce: u64) -> TransactionSigned {
    TransactionSigned {
        nonce,
        to: Address::repeat_byte(0x42),
        value: U256::from(1_000),
        max_fee_per_gas: 2 * INITIAL_BASE_FEE,
        signer,
    }
}

#[test]
fn attempt_builds_on_the_head_without_writing() {
    let mut harness = Harness::new(TestChain::with_blocks(3));
    harness.cycle().unwrap();
    let chain = harness.downloader.chain();

    let (sender, _) = chain.alloc()[0];
    let funded = harness.db.tx().unwrap().get::<tables::PlainState>(sender).unwrap().unwrap();
    let pool = Arc::new(TestPool::default());
    pool.add_transaction(transfer(sender, funded.nonce));

    let (results, mut sealed) = mpsc::channel(2);
    let state = MiningState::new(ETHERBASE, 30_000_000).with_results(results);
    let stages = MiningStages::new(
        state.clone(),
        ChainConfig::default(),
        pool,
        Arc::new(TestConsensus::default()),
    )
    .with_events(harness.notifications.events.clone());
    let mut sync = StagedSync::new(Pipeline::builder().add_stages(stages).build().unwrap());
    let mut pending = harness.notifications.events.subscribe_pending_blocks();

    let view = harness.db.latest_view_id();
    let cancel = CancellationToken::new();
    assert_eq!(mining_step(harness.db.as_ref(), &mut sync, &state, &cancel).unwrap(), 4);

    let block = sealed.try_recv().unwrap();
    assert_eq!(block.number, 4);
    assert_eq!(block.parent_hash, chain.tip().hash());
    assert_eq!(block.beneficiary, ETHERBASE);
    assert_eq!(block.body.transactions.len(), 1);
    assert_eq!(pending.try_recv().unwrap().hash(), block.hash());

    // the overlay went away with the attempt
    assert_eq!(harness.db.latest_view_id(), view);
    let tx = harness.db.tx().unwrap();
    assert_eq!(tx.get::<tables::PlainState>(sender).unwrap(), Some(funded));
    assert_eq!(tx.stage_progress(StageId::MiningFinish.as_str()).unwrap(), 0);
    assert_eq!(tx.canonical_hash(4).unwrap(), None);
    drop(tx);
    harness.assert_progress(3);

    // the next attempt starts from the same head
    assert_eq!(mining_step(harness.db.as_ref(), &mut sync, &state, &cancel).unwrap(), 4);
    assert_eq!(sealed.try_recv().unwrap().parent_hash, chain.tip().hash());
}

#[test]
fn cancelled_attempt_seals_nothing() {
    let harness = Harness::new(TestChain::with_blocks(0));
    let (results, mut sealed) = mpsc::channel(1);
    let state = MiningState::new(ETHERBASE, 30_000_000).with_results(results);
    let stages = MiningStages::new(
        state.clone(),
        ChainConfig::default(),
        Arc::new(TestPool::default()),
        Arc::new(TestConsensus::default()),
    );
    let mut sync = StagedSync::new(Pipeline::builder().add_stages(stages).build().unwrap());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = mining_step(harness.db.as_ref(), &mut sync, &state, &cancel);
    assert_matches!(result, Err(err) if err.is_cancelled());
    assert!(sealed.try_recv().is_err());
}

fn mining_node(chain: &TestChain, consensus: ConsensusConfig) -> Node<MemoryDatabase> {
    let config = Config {
        mining: MiningConfig {
            enabled: true,
            etherbase: ETHERBASE,
            recommit: Duration::from_secs(3600),
            ..Default::default()
        },
        consensus,
        ..Default::default()
    };
    let node = Node::new(config, ChainConfig::default(), Arc::new(MemoryDatabase::new()));
    node.init_genesis(chain.genesis(), chain.alloc()).unwrap();
    node
}

async fn next_block(sealed: &mut mpsc::Receiver<SealedBlock>) -> SealedBlock {
    tokio::time::timeout(Duration::from_secs(10), sealed.recv())
        .await
        .expect("no block sealed in time")
        .expect("results channel closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn mining_loop_follows_the_pool() {
    let chain = TestChain::new(0, Some(ETH_BLOCK_REWARD));
    let node = mining_node(&chain, ConsensusConfig::default());
    let pool = Arc::new(TestPool::default());

    let (results, mut sealed) = mpsc::channel(16);
    let mining = node.mining_loop(pool.clone(), Some(results)).unwrap();
    let handle = mining.spawn(CancellationToken::new());

    let block = next_block(&mut sealed).await;
    assert_eq!(block.number, 1);
    assert_eq!(block.parent_hash, chain.genesis().hash());

    // new pool transactions trigger an attempt long before the recommit interval
    pool.add_transaction(transfer(chain.alloc()[0].0, 0));
    pool.add_transaction(transfer(chain.alloc()[1].0, 0));
    loop {
        let block = next_block(&mut sealed).await;
        assert_eq!(block.number, 1);
        if block.body.transactions.len() == 2 {
            break
        }
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unauthorized_etherbase_is_refused() {
    let chain = TestChain::with_blocks(0);
    let consensus = ConsensusConfig {
        engine: EngineKind::Clique,
        signers: vec![Address::repeat_byte(0x01)],
        ..Default::default()
    };
    let node = mining_node(&chain, consensus);

    let result = node.mining_loop(Arc::new(TestPool::default()), None);
    assert_matches!(
        result,
        Err(NodeError::Consensus(ConsensusError::UnauthorizedSigner(signer))) if signer == ETHERBASE
    );
}
