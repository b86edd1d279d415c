//! Gas sponsorship eligibility for Coinbase Smart Wallet user operations.
//!
//! The checker accepts a user operation only when it is a batch of at most two
//! calls: an optional MagicSpend call followed by a `safeMint` on the
//! application contract. Anything it cannot verify is rejected.

use alloy_primitives::{Address, B256, Bytes, U256, address, b256, bytes};
use alloy_sol_types::{SolCall, SolInterface, sol};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::error::SponsorGuardError;
use crate::rpc::ChainReader;

sol! {
    interface CoinbaseSmartWallet {
        struct Call {
            address target;
            uint256 value;
            bytes data;
        }

        function execute(address target, uint256 value, bytes calldata data) external payable;
        function executeBatch(Call[] calldata calls) external payable;
    }

    interface MyNFT {
        function safeMint(address to) external;
    }
}

pub use CoinbaseSmartWallet::Call;

pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;
pub const ENTRY_POINT_V06: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");
pub const MAGIC_SPEND: Address = address!("011A61C07DbF256A68256B1cB51A5e246730aB92");
pub const SMART_WALLET_V1_IMPLEMENTATION: Address =
    address!("000100abaad02f1cfC8Bbe32bD5a564817339E72");
pub const ERC1967_IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// Runtime bytecode of the ERC-1967 proxy deployed for every smart wallet.
pub fn smart_wallet_proxy_bytecode() -> Bytes {
    bytes!(
        "363d3d373d3d363d7f360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc545af43d6000803e6038573d6000fd5b3d6000f3"
    )
}

/// Entry point v0.6 user operation as sent by wallets (camelCase hex fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    #[serde(default)]
    pub nonce: U256,
    #[serde(default)]
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(default)]
    pub call_gas_limit: U256,
    #[serde(default)]
    pub verification_gas_limit: U256,
    #[serde(default)]
    pub pre_verification_gas: U256,
    #[serde(default)]
    pub max_fee_per_gas: U256,
    #[serde(default)]
    pub max_priority_fee_per_gas: U256,
    #[serde(default)]
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub signature: Bytes,
}

/// What the sponsor is willing to pay for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SponsorPolicy {
    pub chain_id: u64,
    pub entry_point: Address,
    pub proxy_bytecode: Bytes,
    pub implementation_slot: B256,
    pub implementation: Address,
    /// Fee abstraction contract allowed as the first call of a two-call batch.
    pub magic_spend: Address,
    /// The only contract whose `safeMint` gets sponsored.
    pub app_contract: Address,
}

impl Default for SponsorPolicy {
    fn default() -> Self {
        Self {
            chain_id: BASE_SEPOLIA_CHAIN_ID,
            entry_point: ENTRY_POINT_V06,
            proxy_bytecode: smart_wallet_proxy_bytecode(),
            implementation_slot: ERC1967_IMPLEMENTATION_SLOT,
            implementation: SMART_WALLET_V1_IMPLEMENTATION,
            magic_spend: MAGIC_SPEND,
            app_contract: Address::ZERO,
        }
    }
}

/// Why a user operation was not sponsored.
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("chain {0} is not sponsored")]
    WrongChain(u64),
    #[error("unexpected entry point {0}")]
    WrongEntryPoint(String),
    #[error("sender {0} is not a smart wallet proxy")]
    UnknownProxy(Address),
    #[error("sender proxies to unexpected implementation {0}")]
    WrongImplementation(Address),
    #[error("call data is not executeBatch")]
    NotBatch,
    #[error("batch is empty")]
    EmptyBatch,
    #[error("batch has {0} calls, at most 2 allowed")]
    TooManyCalls(usize),
    #[error("first call of a two-call batch targets {0}, expected MagicSpend")]
    NotMagicSpend(Address),
    #[error("call targets {0}, not the application contract")]
    WrongTarget(Address),
    #[error("inner call is not safeMint")]
    MethodNotAllowed,
    #[error(transparent)]
    Failed(#[from] SponsorGuardError),
}

/// Decides whether a user operation may be sponsored.
pub struct SponsorshipChecker {
    reader: Arc<dyn ChainReader>,
    policy: SponsorPolicy,
}

impl SponsorshipChecker {
    pub fn new(reader: Arc<dyn ChainReader>, policy: SponsorPolicy) -> Self {
        Self { reader, policy }
    }

    pub fn policy(&self) -> &SponsorPolicy {
        &self.policy
    }

    /// Never fails: every rejection or error is logged and reported as `false`.
    pub async fn will_sponsor(&self, chain_id: u64, entry_point: &str, user_op: &UserOperation) -> bool {
        match self.check(chain_id, entry_point, user_op).await {
            Ok(()) => {
                tracing::info!(sender = %user_op.sender, "User operation is eligible for sponsorship");
                true
            }
            Err(Rejection::Failed(e)) => {
                tracing::warn!(sender = %user_op.sender, "willSponsor check failed: {}", e);
                false
            }
            Err(reason) => {
                tracing::debug!(sender = %user_op.sender, %reason, "User operation not sponsored");
                false
            }
        }
    }

    /// Guard chain; returns at the first failed check.
    pub async fn check(
        &self,
        chain_id: u64,
        entry_point: &str,
        user_op: &UserOperation,
    ) -> Result<(), Rejection> {
        let policy = &self.policy;

        if chain_id != policy.chain_id {
            return Err(Rejection::WrongChain(chain_id));
        }
        if entry_point.parse::<Address>().ok() != Some(policy.entry_point) {
            return Err(Rejection::WrongEntryPoint(entry_point.to_string()));
        }

        let code = self.reader.get_code(user_op.sender).await?;
        if code != policy.proxy_bytecode {
            return Err(Rejection::UnknownProxy(user_op.sender));
        }

        let word = self
            .reader
            .get_storage_at(user_op.sender, policy.implementation_slot)
            .await?;
        let implementation = Address::from_word(word);
        if implementation != policy.implementation {
            return Err(Rejection::WrongImplementation(implementation));
        }

        let calls = decode_batch(&user_op.call_data)?;
        let call = select_checked_call(&calls, policy.magic_spend)?;

        if call.target != policy.app_contract {
            return Err(Rejection::WrongTarget(call.target));
        }
        if !call.data.starts_with(&MyNFT::safeMintCall::SELECTOR) {
            return Err(Rejection::MethodNotAllowed);
        }
        MyNFT::safeMintCall::abi_decode(&call.data, true).map_err(SponsorGuardError::from)?;

        Ok(())
    }
}

fn decode_batch(call_data: &[u8]) -> Result<Vec<Call>, Rejection> {
    let decoded = CoinbaseSmartWallet::CoinbaseSmartWalletCalls::abi_decode(call_data, true)
        .map_err(SponsorGuardError::from)?;
    match decoded {
        CoinbaseSmartWallet::CoinbaseSmartWalletCalls::executeBatch(batch) => Ok(batch.calls),
        _ => Err(Rejection::NotBatch),
    }
}

/// With two calls the first must be MagicSpend and the second is checked.
fn select_checked_call(calls: &[Call], magic_spend: Address) -> Result<&Call, Rejection> {
    match calls {
        [] => Err(Rejection::EmptyBatch),
        [only] => Ok(only),
        [first, second] => {
            if first.target != magic_spend {
                return Err(Rejection::NotMagicSpend(first.target));
            }
            Ok(second)
        }
        _ => Err(Rejection::TooManyCalls(calls.len())),
    }
}
