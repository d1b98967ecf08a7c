// src/lifecycle.rs
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::accounts::AccountResolver;
use crate::bundler::BundlerAccess;
use crate::calls;
use crate::chain::ChainAccess;
use crate::config::LifecycleConfig;
use crate::error::{AccessError, LifecycleError};
use crate::sponsor::Sponsor;
use crate::types::{
    ChainReceipt, MinedOperation, OperationStatus, SubmissionPath, SubmissionResult, Submitted,
    UserOperation, UserOperationReceipt,
};

/// Per-sender bookkeeping. Holding the slot's lock serializes nonce assignment
/// and submission for that sender. A slot is dropped from the map once it is
/// idle and the chain nonce has passed everything it recorded.
#[derive(Debug, Default)]
struct SenderSlot {
    last_submitted: Option<U256>,
}

/// Drives a user operation from construction to a final receipt.
pub struct OperationManager {
    config: LifecycleConfig,
    chain: Arc<dyn ChainAccess>,
    bundler: Arc<dyn BundlerAccess>,
    owner: LocalWallet,
    sponsor: Sponsor,
    accounts: AccountResolver,
    sender_slots: DashMap<Address, Arc<Mutex<SenderSlot>>>,
}

impl OperationManager {
    pub fn new(
        config: LifecycleConfig,
        chain: Arc<dyn ChainAccess>,
        bundler: Arc<dyn BundlerAccess>,
        owner: LocalWallet,
    ) -> Self {
        let sponsor = Sponsor::new(config.sponsor.clone());
        let accounts = AccountResolver::new(
            chain.clone(),
            config.account_factory,
            config.proxy_creation_code.clone(),
        );

        info!("Initialized operation manager for owner {:?}", owner.address());

        Self {
            config,
            chain,
            bundler,
            owner,
            sponsor,
            accounts,
            sender_slots: DashMap::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner.address()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountResolver {
        &self.accounts
    }

    fn sender_slot(&self, sender: Address) -> Arc<Mutex<SenderSlot>> {
        self.sender_slots.entry(sender).or_default().clone()
    }

    fn release_slot(&self, sender: Address, slot: Arc<Mutex<SenderSlot>>) {
        drop(slot);
        self.sender_slots.remove_if(&sender, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .map(|slot| slot.last_submitted.is_none())
                    .unwrap_or(false)
        });
    }

    /// Build an unsigned operation for `sender`. Gas estimation problems never
    /// fail construction; conservative defaults are used instead.
    pub async fn build_operation(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: bool,
    ) -> Result<UserOperation, LifecycleError> {
        validate_request(sender, &call_data)?;

        let slot = self.sender_slot(sender);
        let operation = {
            let mut guard = slot.lock().await;
            self.build_locked(&mut guard, sender, call_data, sponsor)
                .await
        };
        self.release_slot(sender, slot);
        operation
    }

    async fn build_locked(
        &self,
        slot: &mut SenderSlot,
        sender: Address,
        call_data: Bytes,
        sponsor: bool,
    ) -> Result<UserOperation, LifecycleError> {
        let gas = &self.config.gas;
        let init_code = self.init_code_for(sender).await;

        let chain_nonce = match self.chain.get_nonce(sender).await {
            Ok(nonce) => nonce,
            Err(e) if !init_code.is_empty() => {
                debug!("Account {:?} not deployed yet ({}), using nonce 0", sender, e);
                U256::zero()
            }
            Err(e) => return Err(LifecycleError::AccountUnavailable(e.to_string())),
        };
        let nonce = match slot.last_submitted {
            Some(last) if last >= chain_nonce => {
                info!(
                    "Nonce {} for {:?} is ahead of the on-chain nonce {}; earlier operations are pending or ran directly",
                    last + 1,
                    sender,
                    chain_nonce
                );
                last + 1
            }
            Some(_) => {
                slot.last_submitted = None;
                chain_nonce
            }
            None => chain_nonce,
        };

        let call_gas_limit = match self.estimate_call_gas(sender, &call_data).await {
            Ok(limit) => limit,
            Err(e) => {
                warn!("{}; using default call gas limit", e);
                gas.call_gas_limit
            }
        };
        let (max_fee_per_gas, max_priority_fee_per_gas) = match self.estimate_fees().await {
            Ok(fees) => fees,
            Err(e) => {
                warn!("{}; using default fees", e);
                (gas.max_fee_per_gas, gas.max_priority_fee_per_gas)
            }
        };
        let verification_gas_limit = if init_code.is_empty() {
            gas.verification_gas_limit
        } else {
            gas.deployment_verification_gas_limit
        };

        let paymaster_and_data = if sponsor {
            self.sponsor.paymaster_and_data()?
        } else {
            Bytes::default()
        };

        debug!("Built operation for {:?} with nonce {}", sender, nonce);

        Ok(UserOperation {
            sender,
            nonce,
            init_code,
            call_data,
            call_gas_limit,
            verification_gas_limit,
            pre_verification_gas: gas.pre_verification_gas + gas.pre_verification_buffer,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            paymaster_and_data,
            signature: Bytes::default(),
        })
    }

    /// Deployment code for an account that has no code yet and that the
    /// configured factory would deploy at `sender` for this owner.
    async fn init_code_for(&self, sender: Address) -> Bytes {
        match self.chain.get_code(sender).await {
            Ok(code) if !code.is_empty() => return Bytes::default(),
            Ok(_) => {}
            Err(e) => {
                debug!("Could not read code for {:?}: {}", sender, e);
                return Bytes::default();
            }
        }

        let owner = self.owner.address();
        let salt = self.config.account_salt;
        match self.accounts.counterfactual_address(owner, salt).await {
            Ok(address) if address == sender => {
                self.accounts.init_code(owner, salt).unwrap_or_default()
            }
            Ok(address) => {
                warn!(
                    "Account {:?} has no code and is not this owner's account ({:?})",
                    sender, address
                );
                Bytes::default()
            }
            Err(e) => {
                debug!("No init code for {:?}: {}", sender, e);
                Bytes::default()
            }
        }
    }

    async fn estimate_call_gas(
        &self,
        sender: Address,
        call_data: &Bytes,
    ) -> Result<U256, LifecycleError> {
        let estimate = self
            .chain
            .estimate_gas(Some(self.config.entry_point), sender, call_data.clone())
            .await
            .map_err(|e| LifecycleError::EstimationUnavailable(e.to_string()))?;

        estimate
            .checked_mul(U256::from(100 + self.config.gas.estimate_buffer_percent))
            .map(|buffered| buffered / 100)
            .ok_or_else(|| LifecycleError::EstimationUnavailable("gas estimate overflow".to_string()))
    }

    async fn estimate_fees(&self) -> Result<(U256, U256), LifecycleError> {
        self.chain
            .estimate_fees()
            .await
            .map_err(|e| LifecycleError::EstimationUnavailable(e.to_string()))
    }

    /// Owner signature over the operation hash, as the account validates it.
    pub async fn sign_operation(&self, operation: &UserOperation) -> Result<Bytes, LifecycleError> {
        let op_hash = operation.hash(self.config.entry_point, self.config.chain_id);
        let signature = self
            .owner
            .sign_message(op_hash)
            .await
            .map_err(|e| LifecycleError::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.to_vec()))
    }

    /// Attach the signature and submit. Bundler failures fall back to a single
    /// owner-signed transaction; only if that also fails does the call fail.
    pub async fn submit(
        &self,
        operation: UserOperation,
        signature: Bytes,
    ) -> Result<SubmissionResult, LifecycleError> {
        validate_request(operation.sender, &operation.call_data)?;
        if signature.is_empty() {
            return Err(LifecycleError::InvalidInput(
                "signature must not be empty".to_string(),
            ));
        }

        let sender = operation.sender;
        let slot = self.sender_slot(sender);
        let submitted = {
            let mut guard = slot.lock().await;
            self.dispatch_locked(&mut guard, operation.with_signature(signature))
                .await
        };
        self.release_slot(sender, slot);
        let submitted = submitted?;

        match submitted.path {
            SubmissionPath::Bundler => Ok(SubmissionResult::Accepted(submitted)),
            SubmissionPath::Direct => Ok(self
                .await_receipt(submitted, self.config.max_wait)
                .await
                .into()),
        }
    }

    async fn dispatch_locked(
        &self,
        slot: &mut SenderSlot,
        operation: UserOperation,
    ) -> Result<Submitted, LifecycleError> {
        if let Some(last) = slot.last_submitted {
            if operation.nonce <= last {
                return Err(LifecycleError::InvalidInput(format!(
                    "nonce {} already used for {:?}",
                    operation.nonce, operation.sender
                )));
            }
        }

        let submitted = match self.submit_via_bundler(&operation).await {
            Ok(hash) => {
                info!("UserOperation submitted: {:?}", hash);
                Submitted {
                    path: SubmissionPath::Bundler,
                    hash,
                    sponsored: operation.is_sponsored(),
                }
            }
            Err(e) => {
                warn!("{}; falling back to direct execution", e);
                let hash = self.submit_direct(&operation).await?;
                info!("Direct transaction submitted: {:?}", hash);
                Submitted {
                    path: SubmissionPath::Direct,
                    hash,
                    sponsored: false,
                }
            }
        };

        slot.last_submitted = Some(operation.nonce);
        Ok(submitted)
    }

    async fn submit_via_bundler(&self, operation: &UserOperation) -> Result<H256, LifecycleError> {
        self.bundler
            .send_user_operation(operation, self.config.entry_point)
            .await
            .map_err(|e| LifecycleError::SubmissionRejected(e.to_string()))
    }

    async fn submit_direct(&self, operation: &UserOperation) -> Result<H256, LifecycleError> {
        self.send_direct(operation)
            .await
            .map_err(|e| LifecycleError::SubmissionFailed {
                cause: e.to_string(),
            })
    }

    async fn send_direct(&self, operation: &UserOperation) -> Result<H256, LifecycleError> {
        let owner = self.owner.address();
        let data = calls::direct_call_data(operation.sender, &operation.call_data);

        let nonce = self.chain.get_transaction_count(owner).await?;
        let gas = match self
            .chain
            .estimate_gas(Some(owner), operation.sender, data.clone())
            .await
        {
            Ok(gas) => gas,
            Err(e) => {
                warn!("Direct gas estimation failed: {}", e);
                let defaults = &self.config.gas;
                operation
                    .call_gas_limit
                    .checked_add(operation.verification_gas_limit)
                    .unwrap_or(defaults.call_gas_limit + defaults.verification_gas_limit)
            }
        };
        let (max_fee, priority_fee) = self
            .estimate_fees()
            .await
            .unwrap_or((operation.max_fee_per_gas, operation.max_priority_fee_per_gas));

        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(owner)
            .to(operation.sender)
            .value(U256::zero())
            .data(data)
            .nonce(nonce)
            .gas(gas)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .chain_id(self.config.chain_id)
            .into();

        let signature = self
            .owner
            .sign_transaction(&tx)
            .await
            .map_err(|e| LifecycleError::Signing(e.to_string()))?;

        Ok(self.chain.send_raw_transaction(tx.rlp_signed(&signature)).await?)
    }

    /// Poll until the operation is final or `max_wait` elapses. Running out of
    /// time yields `Pending`, which callers may poll again later.
    pub async fn await_receipt(&self, submitted: Submitted, max_wait: Duration) -> OperationStatus {
        let deadline = Instant::now() + max_wait;

        loop {
            if Instant::now() >= deadline {
                break;
            }

            match self.poll_once(&submitted).await {
                Ok(Some(status)) => return status,
                Ok(None) => {}
                Err(e @ AccessError::Rejected { .. }) => {
                    warn!("Receipt query for {:?} failed: {}", submitted.hash, e)
                }
                Err(e) => debug!("Error checking receipt: {}", e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.config.poll_backoff.min(remaining)).await;
        }

        debug!("No receipt for {:?} after {:?}", submitted.hash, max_wait);
        OperationStatus::Pending(submitted)
    }

    async fn poll_once(&self, submitted: &Submitted) -> Result<Option<OperationStatus>, AccessError> {
        match submitted.path {
            SubmissionPath::Bundler => Ok(self
                .bundler
                .get_user_operation_receipt(submitted.hash)
                .await?
                .map(|receipt| bundler_status(receipt, submitted))),
            SubmissionPath::Direct => Ok(self
                .chain
                .get_transaction_receipt(submitted.hash)
                .await?
                .map(|receipt| direct_status(receipt, submitted))),
        }
    }

    /// Build, sign with the owner key, submit and wait with the default timeout.
    pub async fn execute(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: bool,
    ) -> Result<SubmissionResult, LifecycleError> {
        validate_request(sender, &call_data)?;

        let slot = self.sender_slot(sender);
        let submitted = {
            let mut guard = slot.lock().await;
            self.build_sign_dispatch(&mut guard, sender, call_data, sponsor)
                .await
        };
        self.release_slot(sender, slot);
        let submitted = submitted?;

        Ok(self
            .await_receipt(submitted, self.config.max_wait)
            .await
            .into())
    }

    async fn build_sign_dispatch(
        &self,
        slot: &mut SenderSlot,
        sender: Address,
        call_data: Bytes,
        sponsor: bool,
    ) -> Result<Submitted, LifecycleError> {
        let operation = self.build_locked(slot, sender, call_data, sponsor).await?;
        let signature = self.sign_operation(&operation).await?;
        self.dispatch_locked(slot, operation.with_signature(signature))
            .await
    }
}

fn validate_request(sender: Address, call_data: &Bytes) -> Result<(), LifecycleError> {
    if sender.is_zero() {
        return Err(LifecycleError::InvalidInput(
            "sender must be a non-zero address".to_string(),
        ));
    }
    if !call_data.is_empty() && call_data.len() < 4 {
        return Err(LifecycleError::InvalidInput(
            "call data must start with a 4-byte selector".to_string(),
        ));
    }
    Ok(())
}

fn bundler_status(receipt: UserOperationReceipt, submitted: &Submitted) -> OperationStatus {
    if !receipt.success {
        let reason = receipt
            .reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "user operation reverted".to_string());
        return OperationStatus::Failed { reason };
    }

    OperationStatus::Mined(MinedOperation {
        transaction_hash: receipt.receipt.transaction_hash,
        success: true,
        gas_used: receipt.actual_gas_used,
        sponsored: submitted.sponsored,
        path: SubmissionPath::Bundler,
    })
}

fn direct_status(receipt: ChainReceipt, submitted: &Submitted) -> OperationStatus {
    if !receipt.success {
        return OperationStatus::Failed {
            reason: "transaction reverted".to_string(),
        };
    }

    OperationStatus::Mined(MinedOperation {
        transaction_hash: receipt.transaction_hash,
        success: true,
        gas_used: receipt.gas_used,
        sponsored: submitted.sponsored,
        path: SubmissionPath::Direct,
    })
}
