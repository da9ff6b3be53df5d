//! Collection of methods for header validation shared by all engines.

use stageloop_interfaces::consensus::ConsensusError;
use stageloop_primitives::{calc_base_fee, ChainConfig, SealedHeader};

/// Gas used needs to be less than gas limit. Gas used is going to be checked after execution.
#[inline]
pub fn validate_header_gas(header: &SealedHeader) -> Result<(), ConsensusError> {
    if header.gas_used > header.gas_limit {
        return Err(ConsensusError::HeaderGasUsedExceedsGasLimit {
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
        })
    }
    Ok(())
}

/// Validates that the header links to its parent by hash and number.
#[inline]
pub fn validate_against_parent_hash_number(
    header: &SealedHeader,
    parent: &SealedHeader,
) -> Result<(), ConsensusError> {
    if parent.number + 1 != header.number {
        return Err(ConsensusError::ParentBlockNumberMismatch {
            parent_block_number: parent.number,
            block_number: header.number,
        })
    }
    if parent.hash() != header.parent_hash {
        return Err(ConsensusError::ParentHashMismatch {
            got: header.parent_hash,
            expected: parent.hash(),
        })
    }
    Ok(())
}

/// Validates that the timestamp moves forward.
#[inline]
pub fn validate_against_parent_timestamp(
    header: &SealedHeader,
    parent: &SealedHeader,
) -> Result<(), ConsensusError> {
    if header.timestamp <= parent.timestamp {
        return Err(ConsensusError::TimestampIsInPast {
            parent_timestamp: parent.timestamp,
            timestamp: header.timestamp,
        })
    }
    Ok(())
}

/// Validates the base fee against the fee market rules.
#[inline]
pub fn validate_against_parent_base_fee(
    header: &SealedHeader,
    parent: &SealedHeader,
    chain: &ChainConfig,
) -> Result<(), ConsensusError> {
    if !chain.is_london(header.number) {
        return Ok(())
    }
    let expected = calc_base_fee(chain, parent.header());
    if header.base_fee_per_gas != expected {
        return Err(ConsensusError::BaseFeeDiff { expected, got: header.base_fee_per_gas })
    }
    Ok(())
}

/// Runs every check that does not depend on the engine.
pub fn validate_header_against_parent(
    header: &SealedHeader,
    parent: &SealedHeader,
    chain: &ChainConfig,
) -> Result<(), ConsensusError> {
    validate_header_gas(header)?;
    validate_against_parent_hash_number(header, parent)?;
    validate_against_parent_timestamp(header, parent)?;
    validate_against_parent_base_fee(header, parent, chain)
}
