//! Helpers for working with EIP-1559 base fee

use crate::{constants::INITIAL_BASE_FEE, ChainConfig, Header};

/// Calculate the base fee of the block following `parent`.
///
/// Before London the initial base fee is returned. Otherwise the parent's base fee moves towards
/// the gas target (the parent gas limit divided by the elasticity multiplier) by at most
/// `1 / max_change_denominator` per block, and grows by at least one wei when the target was
/// exceeded.
pub fn calc_base_fee(chain: &ChainConfig, parent: &Header) -> u64 {
    if !chain.is_london(parent.number) {
        return INITIAL_BASE_FEE
    }

    let params = chain.base_fee_params;
    let gas_target = parent.gas_limit / params.elasticity_multiplier;
    if gas_target == 0 || parent.gas_used == gas_target {
        return parent.base_fee_per_gas
    }

    let base_fee = parent.base_fee_per_gas as u128;
    let target = gas_target as u128;
    let denominator = params.max_change_denominator as u128;

    if parent.gas_used > gas_target {
        let gas_used_delta = parent.gas_used as u128 - target;
        let delta = (base_fee * gas_used_delta / target / denominator).max(1);
        u64::try_from(base_fee + delta).unwrap_or(u64::MAX)
    } else {
        let gas_used_delta = target - parent.gas_used as u128;
        let delta = base_fee * gas_used_delta / target / denominator;
        base_fee.saturating_sub(delta) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_base_fee_success() {
        let chain = ChainConfig::default();
        let base_fee = [
            1000000000, 1000000000, 1000000000, 1072671875, 1059263476, 1049238967, 1049238967, 0,
            1, 2,
        ];
        let gas_used = [
            10000000, 10000000, 10000000, 9000000, 10001000, 0, 10000000, 10000000, 10000000,
            10000000,
        ];
        let gas_limit = [
            10000000, 12000000, 14000000, 10000000, 14000000, 2000000, 18000000, 18000000,
            18000000, 18000000,
        ];
        let next_base_fee = [
            1125000000, 1083333333, 1053571428, 1179939062, 1116028649, 918084097, 1063811730, 1,
            2, 3,
        ];

        for i in 0..base_fee.len() {
            let parent = Header {
                number: 10,
                gas_used: gas_used[i],
                gas_limit: gas_limit[i],
                base_fee_per_gas: base_fee[i],
                ..Default::default()
            };
            assert_eq!(next_base_fee[i], calc_base_fee(&chain, &parent));
        }
    }

    #[test]
    fn initial_base_fee_before_london() {
        let chain = ChainConfig { london_block: Some(100), ..Default::default() };
        let parent = Header { number: 5, base_fee_per_gas: 7, ..Default::default() };
        assert_eq!(calc_base_fee(&chain, &parent), INITIAL_BASE_FEE);

        let chain = ChainConfig { london_block: None, ..Default::default() };
        assert_eq!(calc_base_fee(&chain, &parent), INITIAL_BASE_FEE);
    }
}
