use alloy_primitives::U256;
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// Account saved in database.
///
/// An empty account (zero nonce and balance) does not exist in state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct Account {
    /// Nonce.
    pub nonce: u64,
    /// Account balance.
    pub balance: U256,
}

impl Account {
    /// Whether the account is empty and should be removed from state.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero()
    }
}
