use crate::{
    genesis::{genesis_state_root, write_genesis},
    stages::ExecutionStage,
    state::{plain_state_root, StateTransition},
};
use stageloop_db::{tables, Database, DbTxMut, MemoryDatabase};
use stageloop_interfaces::test_utils::TestConsensus;
use stageloop_primitives::{
    calc_base_fee, constants::INITIAL_BASE_FEE, Account, Address, Block, BlockBody, BlockNumber,
    Bytes, ChainConfig, Header, SealedBlock, TransactionSigned, U256,
};
use stageloop_stages_api::{ExecInput, Stage};
use std::{ops::RangeInclusive, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Beneficiary of every generated block.
pub const BENEFICIARY: Address = Address::repeat_byte(0xbe);

const FUNDED_ACCOUNTS: u8 = 4;
const TRANSFERS_PER_BLOCK: u64 = 2;

/// A valid chain of transfer blocks on top of a funded genesis.
///
/// Every block is produced by applying its transfers to the parent state, so headers carry the
/// correct gas used, transaction root and state root.
#[derive(Debug, Clone)]
pub struct TestChain {
    chain: ChainConfig,
    alloc: Vec<(Address, Account)>,
    reward: Option<U256>,
    /// Indexed by block number, genesis included.
    blocks: Vec<SealedBlock>,
}

impl TestChain {
    /// A chain of `blocks` blocks without block rewards.
    pub fn with_blocks(blocks: u64) -> Self {
        Self::new(blocks, None)
    }

    /// A chain of `blocks` blocks paying `reward` to [`BENEFICIARY`].
    pub fn new(blocks: u64, reward: Option<U256>) -> Self {
        let alloc = (0..FUNDED_ACCOUNTS)
            .map(|i| {
                let balance = U256::from(10u64).pow(U256::from(21));
                (Address::with_last_byte(0x10 + i), Account { nonce: 0, balance })
            })
            .collect::<Vec<_>>();
        let header = Header {
            difficulty: U256::from(1),
            base_fee_per_gas: INITIAL_BASE_FEE,
            state_root: genesis_state_root(&alloc),
            ..Default::default()
        };
        let genesis = Block { header, body: BlockBody::default() }.seal_slow();

        let mut chain = Self { chain: ChainConfig::default(), alloc, reward, blocks: vec![genesis] };
        let state = chain.state_at(0);
        chain.extend(&state, blocks, Bytes::new());
        chain
    }

    /// Block at `number`.
    pub fn block(&self, number: BlockNumber) -> &SealedBlock {
        &self.blocks[number as usize]
    }

    /// All blocks, genesis first.
    pub fn blocks(&self) -> &[SealedBlock] {
        &self.blocks
    }

    /// The genesis block.
    pub fn genesis(&self) -> &SealedBlock {
        &self.blocks[0]
    }

    /// The last block.
    pub fn tip(&self) -> &SealedBlock {
        self.blocks.last().expect("genesis is always present")
    }

    /// The genesis allocation.
    pub fn alloc(&self) -> &[(Address, Account)] {
        &self.alloc
    }

    /// A chain sharing blocks `0..=at` with this one, followed by `count` different blocks.
    pub fn fork(&self, at: BlockNumber, count: u64) -> Self {
        let mut fork = Self {
            chain: self.chain.clone(),
            alloc: self.alloc.clone(),
            reward: self.reward,
            blocks: self.blocks[..=at as usize].to_vec(),
        };
        let state = fork.state_at(at);
        fork.extend(&state, count, Bytes::from_static(b"fork"));
        fork
    }

    /// Appends `count` new blocks on top of the tip.
    pub fn grow(&mut self, count: u64) {
        let state = self.state_at(self.tip().number);
        self.extend(&state, count, Bytes::new());
    }

    /// Appends a block produced elsewhere. Its parent must be the tip.
    pub fn push_block(&mut self, block: SealedBlock) {
        assert_eq!(block.parent_hash, self.tip().hash(), "block does not extend the tip");
        self.blocks.push(block);
    }

    /// Modifies the body of block `number` without resealing its header.
    pub fn tamper_block(&mut self, number: BlockNumber, f: impl FnOnce(&mut BlockBody)) {
        f(&mut self.blocks[number as usize].body);
    }

    /// Writes the genesis block and allocation and commits.
    pub fn insert_genesis<DB: Database>(&self, db: &DB) {
        db.update(|tx| write_genesis(tx, self.genesis(), &self.alloc))
            .unwrap()
            .unwrap();
    }

    /// Writes canonical headers and their total difficulty, as the headers stage does.
    pub fn insert_headers<TX: DbTxMut>(&self, tx: &TX, range: RangeInclusive<BlockNumber>) {
        let mut td = self.blocks[..*range.start() as usize]
            .iter()
            .fold(U256::ZERO, |td, block| td + block.difficulty);
        for number in range {
            let block = self.block(number);
            td += block.difficulty;
            tx.put::<tables::Headers>(block.hash(), block.header.header().clone()).unwrap();
            tx.put::<tables::HeaderTD>(block.hash(), td).unwrap();
            tx.put::<tables::CanonicalHeaders>(number, block.hash()).unwrap();
        }
    }

    /// Writes canonical headers and bodies.
    pub fn insert_blocks<TX: DbTxMut>(&self, tx: &TX, range: RangeInclusive<BlockNumber>) {
        self.insert_headers(tx, range.clone());
        for number in range {
            tx.put::<tables::BlockBodies>(number, self.block(number).body.clone()).unwrap();
        }
    }

    /// Writes the recovered senders of the bodies.
    pub fn insert_senders<TX: DbTxMut>(&self, tx: &TX, range: RangeInclusive<BlockNumber>) {
        for number in range {
            let senders = self
                .block(number)
                .body
                .transactions
                .iter()
                .map(|transaction| transaction.signer)
                .collect();
            tx.put::<tables::Senders>(number, senders).unwrap();
        }
    }

    /// A database holding the whole chain with the plain state executed up to `number`.
    pub fn executed_db(&self, number: BlockNumber) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        self.insert_genesis(&db);
        let tip = self.tip().number;
        db.update(|tx| {
            self.insert_blocks(tx, 1..=tip);
            for block in &self.blocks[1..] {
                tx.put::<tables::HeaderNumbers>(block.hash(), block.number).unwrap();
            }
            self.insert_senders(tx, 1..=tip);
        })
        .unwrap();

        let consensus = Arc::new(match self.reward {
            Some(reward) => TestConsensus::with_block_reward(reward),
            None => TestConsensus::default(),
        });
        let mut stage = ExecutionStage::new(consensus, number.max(1));
        db.update(|tx| {
            let input = ExecInput { target: number, ..Default::default() };
            stage.execute(tx, input, &CancellationToken::new()).unwrap();
        })
        .unwrap();
        db
    }

    /// Replays blocks `1..=number` on a fresh database holding only state.
    fn state_at(&self, number: BlockNumber) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        self.insert_genesis(&db);
        for block in &self.blocks[1..=number as usize] {
            let tx = db.tx_mut().unwrap();
            let mut state = StateTransition::new(&tx);
            for transaction in &block.body.transactions {
                state.transact(block.base_fee_per_gas, transaction, transaction.signer).unwrap();
            }
            if let Some(reward) = self.reward {
                state.credit(block.beneficiary, reward).unwrap();
            }
            state.commit(block.number).unwrap();
            tx.commit().unwrap();
        }
        db
    }

    /// Appends `count` blocks, applying them to `state`.
    fn extend(&mut self, state: &MemoryDatabase, count: u64, extra_data: Bytes) {
        for _ in 0..count {
            let parent = self.tip().clone();
            let number = parent.number + 1;
            let base_fee = calc_base_fee(&self.chain, parent.header.header());

            let tx = state.tx_mut().unwrap();
            let mut transition = StateTransition::new(&tx);
            let mut transactions = Vec::new();
            for i in 0..TRANSFERS_PER_BLOCK {
                let (sender, _) =
                    self.alloc[((number * TRANSFERS_PER_BLOCK + i) as usize) % self.alloc.len()];
                let nonce = transition.account(sender).unwrap().unwrap_or_default().nonce;
                let transaction = TransactionSigned {
                    nonce,
                    to: Address::with_last_byte(0x80 + (number % 4) as u8 + 4 * i as u8),
                    value: U256::from(1_000 * number + i),
                    max_fee_per_gas: 2 * INITIAL_BASE_FEE,
                    signer: sender,
                };
                transition.transact(base_fee, &transaction, sender).unwrap();
                transactions.push(transaction);
            }
            if let Some(reward) = self.reward {
                transition.credit(BENEFICIARY, reward).unwrap();
            }
            let gas_used = transition.gas_used();
            transition.commit(number).unwrap();
            let state_root = plain_state_root(&tx).unwrap();
            tx.commit().unwrap();

            let body = BlockBody { transactions };
            let header = Header {
                parent_hash: parent.hash(),
                beneficiary: BENEFICIARY,
                state_root,
                transactions_root: body.calculate_tx_root(),
                difficulty: U256::from(1),
                number,
                gas_limit: parent.gas_limit,
                gas_used,
                timestamp: number * 12,
                extra_data: extra_data.clone(),
                base_fee_per_gas: base_fee,
            };
            self.blocks.push(Block { header, body }.seal_slow());
        }
    }
}

