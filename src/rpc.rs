// src/rpc.rs
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_ether;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned};
use jsonrpsee::RpcModule;
use tracing::{debug, error, info};

use crate::calls;
use crate::error::LifecycleError;
use crate::history::{HistoryEntry, TransactionIndexer};
use crate::lifecycle::OperationManager;
use crate::types::{OperationStatus, SubmissionResult, Submitted, UserOperation};

#[rpc(server, namespace = "aa")]
pub trait LifecycleRpc {
    /// Builds an unsigned user operation with gas, nonce and optional sponsorship filled in
    #[method(name = "buildUserOperation")]
    async fn build_user_operation(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: Option<bool>,
    ) -> RpcResult<UserOperation>;

    #[method(name = "submitUserOperation")]
    async fn submit_user_operation(
        &self,
        user_op: UserOperation,
        signature: Bytes,
    ) -> RpcResult<SubmissionResult>;

    /// Polls for a receipt; `max_wait_ms` defaults to the configured wait
    #[method(name = "awaitReceipt")]
    async fn await_receipt(
        &self,
        submitted: Submitted,
        max_wait_ms: Option<u64>,
    ) -> RpcResult<OperationStatus>;

    /// Builds, signs with the owner key, submits and waits
    #[method(name = "execute")]
    async fn execute(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult>;

    /// Sends `amount` (decimal, 18 decimals) of `token` from the account to `to`
    #[method(name = "transferToken")]
    async fn transfer_token(
        &self,
        account: Address,
        token: Address,
        to: Address,
        amount: String,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult>;

    #[method(name = "mintNft")]
    async fn mint_nft(
        &self,
        account: Address,
        nft: Address,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult>;

    #[method(name = "swapTokens")]
    async fn swap_tokens(
        &self,
        account: Address,
        dex: Address,
        token_in: Address,
        token_out: Address,
        amount_in: String,
        amount_out_min: String,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult>;

    /// Counterfactual smart account address of `owner` (the service owner by default)
    #[method(name = "getAccountAddress")]
    async fn get_account_address(&self, owner: Option<Address>) -> RpcResult<Address>;

    #[method(name = "getTransactionHistory")]
    async fn get_transaction_history(&self, account: Address) -> RpcResult<Vec<HistoryEntry>>;
}

pub struct LifecycleRpcImpl {
    manager: Arc<OperationManager>,
    indexer: Arc<TransactionIndexer>,
}

impl LifecycleRpcImpl {
    pub fn new(manager: Arc<OperationManager>, indexer: Arc<TransactionIndexer>) -> Self {
        Self { manager, indexer }
    }
}

fn rpc_error(e: LifecycleError) -> ErrorObjectOwned {
    error!("Lifecycle request failed: {}", e);
    ErrorObject::owned(e.rpc_code(), e.to_string(), None::<()>)
}

fn parse_amount(field: &str, amount: &str) -> Result<U256, ErrorObjectOwned> {
    parse_ether(amount).map_err(|e| {
        rpc_error(LifecycleError::InvalidInput(format!(
            "{field} {amount:?} is not a decimal amount: {e}"
        )))
    })
}

fn log_result(result: &SubmissionResult) {
    match result {
        SubmissionResult::Accepted(submitted) => {
            info!("Operation accepted via {:?}: {:?}", submitted.path, submitted.hash)
        }
        SubmissionResult::Mined(mined) => {
            info!("Operation mined in {:?}", mined.transaction_hash)
        }
        SubmissionResult::Failed { reason } => info!("Operation failed: {}", reason),
    }
}

#[async_trait]
impl LifecycleRpcServer for LifecycleRpcImpl {
    async fn build_user_operation(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: Option<bool>,
    ) -> RpcResult<UserOperation> {
        debug!("Received build request for sender: {:?}", sender);
        self.manager
            .build_operation(sender, call_data, sponsor.unwrap_or(false))
            .await
            .map_err(rpc_error)
    }

    async fn submit_user_operation(
        &self,
        user_op: UserOperation,
        signature: Bytes,
    ) -> RpcResult<SubmissionResult> {
        debug!("Received submit request for sender: {:?}", user_op.sender);
        let result = self
            .manager
            .submit(user_op, signature)
            .await
            .map_err(rpc_error)?;
        log_result(&result);
        Ok(result)
    }

    async fn await_receipt(
        &self,
        submitted: Submitted,
        max_wait_ms: Option<u64>,
    ) -> RpcResult<OperationStatus> {
        let max_wait = max_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(self.manager.config().max_wait);
        Ok(self.manager.await_receipt(submitted, max_wait).await)
    }

    async fn execute(
        &self,
        sender: Address,
        call_data: Bytes,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult> {
        debug!("Received execute request for sender: {:?}", sender);
        let result = self
            .manager
            .execute(sender, call_data, sponsor.unwrap_or(false))
            .await
            .map_err(rpc_error)?;
        log_result(&result);
        Ok(result)
    }

    async fn transfer_token(
        &self,
        account: Address,
        token: Address,
        to: Address,
        amount: String,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult> {
        let amount = parse_amount("amount", &amount)?;
        self.execute(account, calls::transfer_token(token, to, amount), sponsor)
            .await
    }

    async fn mint_nft(
        &self,
        account: Address,
        nft: Address,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult> {
        self.execute(account, calls::mint_nft(nft, account), sponsor)
            .await
    }

    async fn swap_tokens(
        &self,
        account: Address,
        dex: Address,
        token_in: Address,
        token_out: Address,
        amount_in: String,
        amount_out_min: String,
        sponsor: Option<bool>,
    ) -> RpcResult<SubmissionResult> {
        let amount_in = parse_amount("amountIn", &amount_in)?;
        let amount_out_min = parse_amount("amountOutMin", &amount_out_min)?;
        let call_data = calls::swap_tokens(dex, token_in, token_out, amount_in, amount_out_min);
        self.execute(account, call_data, sponsor).await
    }

    async fn get_account_address(&self, owner: Option<Address>) -> RpcResult<Address> {
        let owner = owner.unwrap_or_else(|| self.manager.owner());
        self.manager
            .accounts()
            .counterfactual_address(owner, self.manager.config().account_salt)
            .await
            .map_err(rpc_error)
    }

    async fn get_transaction_history(&self, account: Address) -> RpcResult<Vec<HistoryEntry>> {
        self.indexer
            .history(account)
            .await
            .map_err(|e| rpc_error(e.into()))
    }
}

pub fn register_methods(module: &mut RpcModule<LifecycleRpcImpl>) -> anyhow::Result<()> {
    module.register_async_method("aa_buildUserOperation", |params, context| async move {
        let mut seq = params.sequence();
        let sender = seq.next::<Address>()?;
        let call_data = seq.next::<Bytes>()?;
        let sponsor = seq.optional_next::<bool>()?;
        context.build_user_operation(sender, call_data, sponsor).await
    })?;

    module.register_async_method("aa_submitUserOperation", |params, context| async move {
        let (user_op, signature) = params.parse::<(UserOperation, Bytes)>()?;
        context.submit_user_operation(user_op, signature).await
    })?;

    module.register_async_method("aa_awaitReceipt", |params, context| async move {
        let mut seq = params.sequence();
        let submitted = seq.next::<Submitted>()?;
        let max_wait_ms = seq.optional_next::<u64>()?;
        context.await_receipt(submitted, max_wait_ms).await
    })?;

    module.register_async_method("aa_execute", |params, context| async move {
        let mut seq = params.sequence();
        let sender = seq.next::<Address>()?;
        let call_data = seq.next::<Bytes>()?;
        let sponsor = seq.optional_next::<bool>()?;
        context.execute(sender, call_data, sponsor).await
    })?;

    module.register_async_method("aa_transferToken", |params, context| async move {
        let mut seq = params.sequence();
        let account = seq.next::<Address>()?;
        let token = seq.next::<Address>()?;
        let to = seq.next::<Address>()?;
        let amount = seq.next::<String>()?;
        let sponsor = seq.optional_next::<bool>()?;
        context
            .transfer_token(account, token, to, amount, sponsor)
            .await
    })?;

    module.register_async_method("aa_mintNft", |params, context| async move {
        let mut seq = params.sequence();
        let account = seq.next::<Address>()?;
        let nft = seq.next::<Address>()?;
        let sponsor = seq.optional_next::<bool>()?;
        context.mint_nft(account, nft, sponsor).await
    })?;

    module.register_async_method("aa_swapTokens", |params, context| async move {
        let mut seq = params.sequence();
        let account = seq.next::<Address>()?;
        let dex = seq.next::<Address>()?;
        let token_in = seq.next::<Address>()?;
        let token_out = seq.next::<Address>()?;
        let amount_in = seq.next::<String>()?;
        let amount_out_min = seq.next::<String>()?;
        let sponsor = seq.optional_next::<bool>()?;
        context
            .swap_tokens(account, dex, token_in, token_out, amount_in, amount_out_min, sponsor)
            .await
    })?;

    module.register_async_method("aa_getAccountAddress", |params, context| async move {
        let owner = params.sequence().optional_next::<Address>()?;
        context.get_account_address(owner).await
    })?;

    module.register_async_method("aa_getTransactionHistory", |params, context| async move {
        let account = params.one::<Address>()?;
        context.get_transaction_history(account).await
    })?;

    Ok(())
}
