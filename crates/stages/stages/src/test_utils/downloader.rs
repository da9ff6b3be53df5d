use super::TestChain;
use parking_lot::Mutex;
use stageloop_interfaces::{
    p2p::{
        BodyDownloader, DownloadError, DownloadResult, HeaderDownloader, Penalize, PenaltyKind,
        PeerId, WithPeerId,
    },
    payload::PayloadSink,
};
use stageloop_primitives::{BlockBody, BlockHash, BlockNumber, SealedBlock, SealedHeader, B256};
use std::collections::HashMap;

/// Serves headers and bodies of a [`TestChain`] as if a single peer announced it.
#[derive(Debug)]
pub struct TestDownloader {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    chain: TestChain,
    overrides: HashMap<BlockHash, BlockBody>,
    penalties: Vec<(PeerId, PenaltyKind)>,
    requested_heads: Vec<BlockHash>,
    offline: bool,
}

impl TestDownloader {
    /// The peer every response is attributed to.
    pub const PEER: PeerId = B256::repeat_byte(0x99);

    /// Serves `chain`.
    pub fn new(chain: TestChain) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chain,
                overrides: HashMap::new(),
                penalties: Vec::new(),
                requested_heads: Vec::new(),
                offline: false,
            }),
        }
    }

    /// Replaces the served chain, e.g. with a fork.
    pub fn set_chain(&self, chain: TestChain) {
        self.inner.lock().chain = chain;
    }

    /// The chain currently served.
    pub fn chain(&self) -> TestChain {
        self.inner.lock().chain.clone()
    }

    /// Serves `body` for the block with the given hash instead of the real one.
    pub fn override_body(&self, hash: BlockHash, body: BlockBody) {
        self.inner.lock().overrides.insert(hash, body);
    }

    /// Makes every request fail with [`DownloadError::NoPeers`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Penalties reported so far.
    pub fn penalties(&self) -> Vec<(PeerId, PenaltyKind)> {
        self.inner.lock().penalties.clone()
    }

    /// Heads requested through [`PayloadSink::request_head`].
    pub fn requested_heads(&self) -> Vec<BlockHash> {
        self.inner.lock().requested_heads.clone()
    }
}

impl Penalize for TestDownloader {
    fn penalize(&self, peer: PeerId, kind: PenaltyKind) {
        self.inner.lock().penalties.push((peer, kind));
    }
}

impl HeaderDownloader for TestDownloader {
    fn download_headers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> DownloadResult<Vec<WithPeerId<SealedHeader>>> {
        let inner = self.inner.lock();
        if inner.offline {
            return Err(DownloadError::NoPeers)
        }
        let end = end.min(inner.chain.tip().number);
        Ok((start..=end)
            .map(|number| WithPeerId(Self::PEER, inner.chain.block(number).header.clone()))
            .collect())
    }

    fn header_by_number(&self, number: BlockNumber) -> DownloadResult<Option<SealedHeader>> {
        let inner = self.inner.lock();
        if inner.offline {
            return Err(DownloadError::NoPeers)
        }
        Ok(inner.chain.blocks().get(number as usize).map(|block| block.header.clone()))
    }
}

impl BodyDownloader for TestDownloader {
    fn download_bodies(
        &self,
        headers: &[SealedHeader],
    ) -> DownloadResult<Vec<WithPeerId<BlockBody>>> {
        let inner = self.inner.lock();
        if inner.offline {
            return Err(DownloadError::NoPeers)
        }

        let mut bodies = Vec::with_capacity(headers.len());
        for header in headers {
            let body = inner.overrides.get(&header.hash()).cloned().or_else(|| {
                inner
                    .chain
                    .blocks()
                    .get(header.number as usize)
                    .filter(|block| block.hash() == header.hash())
                    .map(|block| block.body.clone())
            });
            match body {
                Some(body) => bodies.push(WithPeerId(Self::PEER, body)),
                None if bodies.is_empty() => {
                    return Err(DownloadError::MissingBody {
                        number: header.number,
                        hash: header.hash(),
                    })
                }
                None => break,
            }
        }
        Ok(bodies)
    }
}

impl PayloadSink for TestDownloader {
    fn insert_payload(&self, block: SealedBlock) {
        let mut inner = self.inner.lock();
        if block.parent_hash == inner.chain.tip().hash() {
            inner.chain.push_block(block);
        }
    }

    fn request_head(&self, head: BlockHash) {
        self.inner.lock().requested_heads.push(head);
    }
}
