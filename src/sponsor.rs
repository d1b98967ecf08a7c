// src/sponsor.rs
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Address, Bytes};
use tracing::{debug, warn};

use crate::config::SponsorConfig;
use crate::error::LifecycleError;

/// Produces `paymasterAndData` for operations whose gas is covered by a policy.
pub struct Sponsor {
    config: SponsorConfig,
}

impl Sponsor {
    pub fn new(config: SponsorConfig) -> Self {
        Self { config }
    }

    /// Paymaster data for a sponsored operation, or empty bytes when no policy
    /// is configured. Missing configuration is not an error: the operation is
    /// simply paid for by the account.
    pub fn paymaster_and_data(&self) -> Result<Bytes, LifecycleError> {
        let paymaster = match (self.config.paymaster, self.config.is_configured()) {
            (Some(paymaster), true) => paymaster,
            _ => {
                warn!("Sponsorship requested but no gas policy is configured");
                return Ok(Bytes::default());
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| LifecycleError::InvalidInput(e.to_string()))?
            .as_secs();
        let valid_after = now;
        let valid_until = now + self.config.valid_duration;

        debug!(
            "Attaching paymaster {:?} valid until {}",
            paymaster, valid_until
        );
        Ok(encode_paymaster_data(paymaster, valid_until, valid_after))
    }
}

/// paymaster (20 bytes) + validUntil (32 bytes) + validAfter (32 bytes)
fn encode_paymaster_data(paymaster: Address, valid_until: u64, valid_after: u64) -> Bytes {
    let mut data = Vec::with_capacity(20 + 64);
    data.extend_from_slice(paymaster.as_bytes());

    let mut valid_until_bytes = [0u8; 32];
    valid_until_bytes[24..].copy_from_slice(&valid_until.to_be_bytes());
    data.extend_from_slice(&valid_until_bytes);

    let mut valid_after_bytes = [0u8; 32];
    valid_after_bytes[24..].copy_from_slice(&valid_after.to_be_bytes());
    data.extend_from_slice(&valid_after_bytes);

    Bytes::from(data)
}
