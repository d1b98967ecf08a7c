// src/chain.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::bindings::SimpleAccount;
use crate::error::AccessError;
use crate::types::{BlockSummary, BlockTransaction, ChainReceipt};

/// Read and write access to the chain the smart accounts live on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainAccess: Send + Sync + 'static {
    /// EntryPoint-facing nonce reported by the smart account.
    async fn get_nonce(&self, account: Address) -> Result<U256, AccessError>;

    /// Transaction count of an externally owned address.
    async fn get_transaction_count(&self, address: Address) -> Result<U256, AccessError>;

    async fn estimate_gas(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<U256, AccessError>;

    /// Returns `(max_fee_per_gas, max_priority_fee_per_gas)`.
    async fn estimate_fees(&self) -> Result<(U256, U256), AccessError>;

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, AccessError>;

    async fn get_code(&self, account: Address) -> Result<Bytes, AccessError>;

    async fn get_block_number(&self) -> Result<u64, AccessError>;

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, AccessError>;

    async fn get_transaction_receipt(&self, hash: H256)
        -> Result<Option<ChainReceipt>, AccessError>;

    async fn send_raw_transaction(&self, signed_tx: Bytes) -> Result<H256, AccessError>;
}

fn transport<E: std::fmt::Display>(e: E) -> AccessError {
    AccessError::Transport(e.to_string())
}

/// Chain access over an ethers HTTP provider.
pub struct EthersChain {
    client: Arc<Provider<Http>>,
}

impl EthersChain {
    pub fn new(eth_rpc_url: &str) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(eth_rpc_url)?;
        Ok(Self {
            client: Arc::new(provider),
        })
    }
}

#[async_trait]
impl ChainAccess for EthersChain {
    async fn get_nonce(&self, account: Address) -> Result<U256, AccessError> {
        let account = SimpleAccount::new(account, self.client.clone());
        account.get_nonce().call().await.map_err(|e| match e {
            ContractError::DecodingError(_) | ContractError::DetokenizationError(_) => {
                AccessError::Decode(e.to_string())
            }
            _ => transport(e),
        })
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, AccessError> {
        self.client
            .get_transaction_count(address, None)
            .await
            .map_err(transport)
    }

    async fn estimate_gas(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<U256, AccessError> {
        let mut request = Eip1559TransactionRequest::new().to(to).data(data);
        if let Some(from) = from {
            request = request.from(from);
        }
        let tx: TypedTransaction = request.into();
        self.client.estimate_gas(&tx, None).await.map_err(transport)
    }

    async fn estimate_fees(&self) -> Result<(U256, U256), AccessError> {
        self.client
            .estimate_eip1559_fees(None)
            .await
            .map_err(transport)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, AccessError> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new().to(to).data(data).into();
        self.client.call(&tx, None).await.map_err(transport)
    }

    async fn get_code(&self, account: Address) -> Result<Bytes, AccessError> {
        self.client.get_code(account, None).await.map_err(transport)
    }

    async fn get_block_number(&self) -> Result<u64, AccessError> {
        let number = self.client.get_block_number().await.map_err(transport)?;
        Ok(number.as_u64())
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, AccessError> {
        let block = self
            .client
            .get_block_with_txs(number)
            .await
            .map_err(transport)?;

        Ok(block.map(|block| BlockSummary {
            number: block.number.map(|n| n.as_u64()).unwrap_or(number),
            timestamp: block.timestamp.low_u64(),
            transactions: block
                .transactions
                .into_iter()
                .map(|tx| BlockTransaction {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    value: tx.value,
                    input: tx.input,
                })
                .collect(),
        }))
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<ChainReceipt>, AccessError> {
        let receipt = self
            .client
            .get_transaction_receipt(hash)
            .await
            .map_err(transport)?;

        Ok(receipt.map(|receipt| ChainReceipt {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            gas_used: receipt.gas_used.unwrap_or_default(),
            logs: receipt.logs,
        }))
    }

    async fn send_raw_transaction(&self, signed_tx: Bytes) -> Result<H256, AccessError> {
        let pending = self
            .client
            .send_raw_transaction(signed_tx)
            .await
            .map_err(transport)?;
        let hash = pending.tx_hash();
        debug!("Broadcast raw transaction {:?}", hash);
        Ok(hash)
    }
}
