// src/history.rs
//! Best-effort transaction history for a smart account.
//!
//! There is no indexer behind this: recent blocks are scanned and matched with
//! heuristics. Matches can be false positives, so every entry records how it
//! was matched.
use std::sync::Arc;

use ethers::abi::AbiDecode;
use ethers::contract::EthCall;
use ethers::types::{Address, Log, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bindings::{CreateAccountCall, ExecuteBatchCall, ExecuteCall, MintCall, SwapCall, TransferCall};
use crate::calls;
use crate::chain::ChainAccess;
use crate::error::AccessError;
use crate::types::BlockTransaction;

/// How a transaction was tied to the account, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchKind {
    /// Sent by or to the account.
    Direct,
    /// Sent to the account factory.
    Factory,
    /// The account address appears in the calldata.
    Calldata,
    /// Only the receipt logs mention the account.
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    AccountCreation,
    TokenTransfer,
    NftMint,
    TokenSwap,
    AccountExecute,
    ContractCall,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_used: U256,
    pub success: bool,
    pub block_number: u64,
    pub timestamp: u64,
    pub kind: TransactionKind,
    pub match_kind: MatchKind,
    pub log_count: usize,
}

enum Candidate {
    Matched(MatchKind),
    CheckLogs,
}

pub struct TransactionIndexer {
    chain: Arc<dyn ChainAccess>,
    factory: Option<Address>,
    lookback: u64,
}

impl TransactionIndexer {
    pub fn new(chain: Arc<dyn ChainAccess>, factory: Option<Address>, lookback: u64) -> Self {
        Self {
            chain,
            factory,
            lookback,
        }
    }

    /// Transactions related to `account` in the last `lookback` blocks, newest
    /// first. Blocks and receipts that cannot be read are skipped.
    pub async fn history(&self, account: Address) -> Result<Vec<HistoryEntry>, AccessError> {
        let latest = self.chain.get_block_number().await?;
        let first = latest.saturating_sub(self.lookback);
        let mut entries = Vec::new();

        for number in first..=latest {
            let block = match self.chain.get_block(number).await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to get block {}: {}", number, e);
                    continue;
                }
            };

            for tx in &block.transactions {
                let Some(candidate) = self.candidate(account, tx) else {
                    continue;
                };

                let receipt = match self.chain.get_transaction_receipt(tx.hash).await {
                    Ok(Some(receipt)) => receipt,
                    Ok(None) => {
                        debug!("No receipt for {:?}", tx.hash);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to get receipt for {:?}: {}", tx.hash, e);
                        continue;
                    }
                };

                let match_kind = match candidate {
                    Candidate::Matched(kind) => kind,
                    Candidate::CheckLogs if logs_mention(&receipt.logs, account) => MatchKind::Log,
                    Candidate::CheckLogs => continue,
                };

                entries.push(HistoryEntry {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to,
                    value: tx.value,
                    gas_used: receipt.gas_used,
                    success: receipt.success,
                    block_number: block.number,
                    timestamp: block.timestamp,
                    kind: self.classify(tx),
                    match_kind,
                    log_count: receipt.logs.len(),
                });
            }
        }

        entries.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        info!(
            "Found {} transactions for {:?} in blocks {}..={}",
            entries.len(),
            account,
            first,
            latest
        );
        Ok(entries)
    }

    fn candidate(&self, account: Address, tx: &BlockTransaction) -> Option<Candidate> {
        if tx.from == account || tx.to == Some(account) {
            return Some(Candidate::Matched(MatchKind::Direct));
        }
        if self.factory.is_some() && tx.to == self.factory {
            return Some(Candidate::Matched(MatchKind::Factory));
        }
        if hex::encode(&tx.input).contains(&hex::encode(account)) {
            return Some(Candidate::Matched(MatchKind::Calldata));
        }
        if tx.input.len() > 4 {
            return Some(Candidate::CheckLogs);
        }
        None
    }

    fn classify(&self, tx: &BlockTransaction) -> TransactionKind {
        if self.factory.is_some() && tx.to == self.factory {
            return TransactionKind::AccountCreation;
        }
        classify_call(&tx.input)
    }
}

fn classify_call(input: &[u8]) -> TransactionKind {
    let Some(selector) = calls::selector(input) else {
        return TransactionKind::Transfer;
    };

    if selector == ExecuteCall::selector() {
        // Report what the account was asked to do when it is recognizable.
        return match ExecuteCall::decode(input) {
            Ok(call) => match classify_call(&call.func) {
                TransactionKind::ContractCall | TransactionKind::Transfer => {
                    TransactionKind::AccountExecute
                }
                inner => inner,
            },
            Err(_) => TransactionKind::AccountExecute,
        };
    }

    match selector {
        s if s == CreateAccountCall::selector() => TransactionKind::AccountCreation,
        s if s == TransferCall::selector() => TransactionKind::TokenTransfer,
        s if s == MintCall::selector() => TransactionKind::NftMint,
        s if s == SwapCall::selector() => TransactionKind::TokenSwap,
        s if s == ExecuteBatchCall::selector() => TransactionKind::AccountExecute,
        _ => TransactionKind::ContractCall,
    }
}

fn logs_mention(logs: &[Log], account: Address) -> bool {
    let needle = hex::encode(account);
    logs.iter().any(|log| {
        log.address == account
            || log
                .topics
                .iter()
                .any(|topic| topic.as_bytes()[12..] == account.as_bytes()[..])
            || hex::encode(&log.data).contains(&needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainAccess;
    use crate::types::{BlockSummary, ChainReceipt};
    use ethers::abi::AbiEncode;
    use ethers::types::Bytes;

    fn account() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn factory() -> Address {
        Address::repeat_byte(0x9a)
    }

    fn tx(hash: u8, from: Address, to: Address, input: Bytes) -> BlockTransaction {
        BlockTransaction {
            hash: H256::repeat_byte(hash),
            from,
            to: Some(to),
            value: U256::zero(),
            input,
        }
    }

    fn unrelated_call() -> Bytes {
        TransferCall {
            to: Address::repeat_byte(0x33),
            amount: U256::from(5),
        }
        .encode()
        .into()
    }

    fn indexer(chain: MockChainAccess, lookback: u64) -> TransactionIndexer {
        TransactionIndexer::new(Arc::new(chain), Some(factory()), lookback)
    }

    #[test]
    fn test_classify_by_selector() {
        let transfer: Bytes = unrelated_call();
        assert_eq!(classify_call(&transfer), TransactionKind::TokenTransfer);
        assert_eq!(
            classify_call(&calls::mint_nft(Address::repeat_byte(0x01), account())),
            TransactionKind::NftMint
        );
        assert_eq!(
            classify_call(&calls::execute(Address::repeat_byte(0x01), U256::zero(), Bytes::new())),
            TransactionKind::AccountExecute
        );
        assert_eq!(classify_call(&[0xde, 0xad, 0xbe, 0xef]), TransactionKind::ContractCall);
        assert_eq!(classify_call(&[]), TransactionKind::Transfer);
    }

    #[test]
    fn test_classify_looks_inside_execute() {
        let swap = calls::swap_tokens(
            Address::repeat_byte(0x0d),
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            U256::from(10),
            U256::from(9),
        );
        assert_eq!(classify_call(&swap), TransactionKind::TokenSwap);
    }

    #[tokio::test]
    async fn test_history_matches_and_sorts_newest_first() {
        let other = Address::repeat_byte(0x44);
        let mut chain = MockChainAccess::new();
        chain.expect_get_block_number().returning(|| Ok(12));
        chain.expect_get_block().returning(move |number| {
            let transactions = match number {
                10 => vec![tx(1, other, account(), Bytes::new())],
                11 => vec![
                    tx(2, other, factory(), Bytes::from(vec![0x5f, 0xbf, 0xb9, 0xcf])),
                    tx(3, other, other, Bytes::new()),
                ],
                12 => vec![
                    tx(4, other, Address::repeat_byte(0x0d), calls::mint_nft(other, account())),
                    tx(5, other, Address::repeat_byte(0x0e), unrelated_call()),
                    tx(6, other, Address::repeat_byte(0x0f), unrelated_call()),
                ],
                _ => vec![],
            };
            Ok(Some(BlockSummary {
                number,
                timestamp: 1_700_000_000 + number,
                transactions,
            }))
        });
        chain.expect_get_transaction_receipt().returning(|hash| {
            let logs = if hash == H256::repeat_byte(5) {
                vec![Log {
                    topics: vec![H256::zero(), H256::from(account())],
                    ..Default::default()
                }]
            } else {
                vec![]
            };
            Ok(Some(ChainReceipt {
                transaction_hash: hash,
                success: true,
                gas_used: U256::from(21_000),
                logs,
            }))
        });

        let entries = indexer(chain, 2).history(account()).await.unwrap();
        let summary: Vec<_> = entries
            .iter()
            .map(|e| (e.hash, e.block_number, e.match_kind, e.kind))
            .collect();

        assert_eq!(
            summary,
            vec![
                (H256::repeat_byte(4), 12, MatchKind::Calldata, TransactionKind::NftMint),
                (H256::repeat_byte(5), 12, MatchKind::Log, TransactionKind::TokenTransfer),
                (H256::repeat_byte(2), 11, MatchKind::Factory, TransactionKind::AccountCreation),
                (H256::repeat_byte(1), 10, MatchKind::Direct, TransactionKind::Transfer),
            ]
        );
        assert_eq!(entries[0].timestamp, 1_700_000_012);
    }

    #[tokio::test]
    async fn test_history_skips_unreadable_blocks_and_receipts() {
        let mut chain = MockChainAccess::new();
        chain.expect_get_block_number().returning(|| Ok(3));
        chain.expect_get_block().returning(|number| match number {
            1 => Err(AccessError::Transport("timeout".to_string())),
            2 => Ok(None),
            _ => Ok(Some(BlockSummary {
                number,
                timestamp: number,
                transactions: vec![tx(number as u8, account(), Address::repeat_byte(0x01), Bytes::new())],
            })),
        });
        chain.expect_get_transaction_receipt().returning(|hash| {
            if hash == H256::repeat_byte(0) {
                Err(AccessError::Transport("timeout".to_string()))
            } else {
                Ok(Some(ChainReceipt {
                    transaction_hash: hash,
                    success: false,
                    ..Default::default()
                }))
            }
        });

        let entries = indexer(chain, 10).history(account()).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].block_number, 3);
        assert!(!entries[0].success);
    }

    #[tokio::test]
    async fn test_history_propagates_block_number_failure() {
        let mut chain = MockChainAccess::new();
        chain
            .expect_get_block_number()
            .returning(|| Err(AccessError::Transport("connection refused".to_string())));

        assert!(indexer(chain, 10).history(account()).await.is_err());
    }
}
