use crate::{BlockNumber, Header, SealedHeader};
use alloy_primitives::{Address, B256};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::ops::Range;

/// Returns a seeded random number generator so test data is reproducible.
pub fn rng() -> StdRng {
    StdRng::seed_from_u64(0x5747_4c50)
}

/// Generate a random [`SealedHeader`].
///
/// The header is assumed to not be correct if validated.
pub fn random_header<R: Rng>(rng: &mut R, number: BlockNumber, parent: Option<B256>) -> SealedHeader {
    Header {
        number,
        parent_hash: parent.unwrap_or_else(|| B256::from(rng.gen::<[u8; 32]>())),
        beneficiary: Address::from(rng.gen::<[u8; 20]>()),
        gas_limit: rng.gen_range(5_000_000..30_000_000),
        timestamp: rng.gen_range(1..1_000_000),
        base_fee_per_gas: rng.gen_range(1..1_000_000_000),
        ..Default::default()
    }
    .seal_slow()
}

/// Generates a range of random [`SealedHeader`]s.
///
/// The parent hash of the first header in the result will be equal to `head`.
///
/// The headers are assumed to not be correct if validated.
pub fn random_header_range<R: Rng>(
    rng: &mut R,
    range: Range<BlockNumber>,
    head: B256,
) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(range.end.saturating_sub(range.start) as usize);
    for idx in range {
        let parent = headers.last().map(|h: &SealedHeader| h.hash()).unwrap_or(head);
        headers.push(random_header(rng, idx, Some(parent)));
    }
    headers
}
