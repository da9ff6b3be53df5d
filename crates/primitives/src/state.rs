use crate::{constants::EMPTY_ROOT_HASH, Account};
use alloy_primitives::{keccak256, B256};

/// Computes the state commitment over hashed accounts.
///
/// The commitment is a keccak256 digest over `hashed_address ++ rlp(account)` for every account
/// in ascending hashed-address order. Callers must supply the accounts sorted.
pub fn state_root<I>(accounts: I) -> B256
where
    I: IntoIterator<Item = (B256, Account)>,
{
    let mut buf = Vec::new();
    for (hashed_address, account) in accounts {
        buf.extend_from_slice(hashed_address.as_slice());
        alloy_rlp::Encodable::encode(&account, &mut buf);
    }
    if buf.is_empty() {
        return EMPTY_ROOT_HASH
    }
    keccak256(buf)
}
