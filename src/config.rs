// src/config.rs
use std::time::Duration;

use ethers::types::{Address, Bytes, U256};

/// ERC-4337 EntryPoint v0.6, deployed at the same address on most chains.
pub const ENTRY_POINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Conservative gas values used whenever live estimation is unavailable.
#[derive(Debug, Clone)]
pub struct GasDefaults {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    /// Used instead of `verification_gas_limit` when the operation deploys the account.
    pub deployment_verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    /// Added on top of `pre_verification_gas` to absorb signature length differences.
    pub pre_verification_buffer: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// Percentage added to live call gas estimates.
    pub estimate_buffer_percent: u64,
}

impl Default for GasDefaults {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(500_000),
            verification_gas_limit: U256::from(100_000),
            deployment_verification_gas_limit: U256::from(400_000),
            pre_verification_gas: U256::from(21_000),
            pre_verification_buffer: U256::from(30_000),
            max_fee_per_gas: U256::from(1_500_000_000u64), // 1.5 gwei
            max_priority_fee_per_gas: U256::from(1_500_000_000u64),
            estimate_buffer_percent: 10,
        }
    }
}

/// Gas sponsorship settings. Both fields must be present for sponsorship to apply.
#[derive(Debug, Clone, Default)]
pub struct SponsorConfig {
    pub paymaster: Option<Address>,
    pub policy_id: Option<String>,
    /// Validity window in seconds encoded into the paymaster data.
    pub valid_duration: u64,
}

impl SponsorConfig {
    pub fn is_configured(&self) -> bool {
        self.paymaster.is_some() && self.policy_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Everything the lifecycle manager needs to know about its deployment.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub chain_id: u64,
    pub entry_point: Address,
    pub account_factory: Option<Address>,
    pub account_salt: U256,
    /// ERC1967 proxy creation code, used only when the factory cannot report addresses.
    pub proxy_creation_code: Option<Bytes>,
    pub sponsor: SponsorConfig,
    pub gas: GasDefaults,
    pub poll_backoff: Duration,
    pub max_wait: Duration,
    pub history_lookback: u64,
}

impl LifecycleConfig {
    pub fn new(chain_id: u64, entry_point: Address) -> Self {
        Self {
            chain_id,
            entry_point,
            account_factory: None,
            account_salt: U256::zero(),
            proxy_creation_code: None,
            sponsor: SponsorConfig {
                valid_duration: 3600,
                ..Default::default()
            },
            gas: GasDefaults::default(),
            poll_backoff: DEFAULT_POLL_BACKOFF,
            max_wait: DEFAULT_MAX_WAIT,
            history_lookback: 1_000,
        }
    }
}
