use crate::{constants::TRANSFER_GAS, TxHash};
use alloy_primitives::{keccak256, Address, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

/// A signed value transfer.
///
/// Signature verification is the consensus engine's concern; the transaction carries the
/// authenticated signer, and an unset (zero) signer means the signature did not verify.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct TransactionSigned {
    /// Sender nonce.
    pub nonce: u64,
    /// Recipient.
    pub to: Address,
    /// Transferred amount in wei.
    pub value: U256,
    /// Maximum fee per gas the sender is willing to pay.
    pub max_fee_per_gas: u64,
    /// Authenticated sender.
    pub signer: Address,
}

impl TransactionSigned {
    /// Transaction hash.
    pub fn hash(&self) -> TxHash {
        keccak256(alloy_rlp::encode(self))
    }

    /// Recover the signer of the transaction.
    ///
    /// Returns `None` if the transaction's signature is invalid.
    pub fn recover_signer(&self) -> Option<Address> {
        (!self.signer.is_zero()).then_some(self.signer)
    }

    /// Gas consumed by the transaction.
    pub const fn gas_used(&self) -> u64 {
        TRANSFER_GAS
    }

    /// Maximum amount the sender pays for gas.
    pub fn max_fee(&self) -> U256 {
        U256::from(self.max_fee_per_gas) * U256::from(self.gas_used())
    }
}
