// src/types.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// ERC-4337 v0.6 user operation. Built unsigned, signed once, then submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Whether a paymaster was attached at build time.
    pub fn is_sponsored(&self) -> bool {
        !self.paymaster_and_data.is_empty()
    }

    pub fn with_signature(mut self, signature: Bytes) -> Self {
        self.signature = signature;
        self
    }

    fn pack_without_signature(&self) -> Bytes {
        let encoded = encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ]);

        Bytes::from(encoded)
    }

    /// The hash the account owner signs: keccak(keccak(pack(op)), entryPoint, chainId).
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let op_hash = keccak256(self.pack_without_signature());
        H256::from(keccak256(encode(&[
            Token::FixedBytes(op_hash.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ])))
    }
}

/// Which of the two submission routes carried an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionPath {
    Bundler,
    Direct,
}

/// A dispatched operation awaiting finality. `hash` is the user operation hash
/// for bundler submissions and the transaction hash for direct ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub path: SubmissionPath,
    pub hash: H256,
    pub sponsored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedOperation {
    pub transaction_hash: H256,
    pub success: bool,
    pub gas_used: U256,
    pub sponsored: bool,
    pub path: SubmissionPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubmissionResult {
    Accepted(Submitted),
    Mined(MinedOperation),
    Failed { reason: String },
}

/// Outcome of polling for a receipt. `Pending` means the wait elapsed, not that
/// anything went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum OperationStatus {
    Pending(Submitted),
    Mined(MinedOperation),
    Failed { reason: String },
}

impl From<OperationStatus> for SubmissionResult {
    fn from(status: OperationStatus) -> Self {
        match status {
            OperationStatus::Pending(submitted) => SubmissionResult::Accepted(submitted),
            OperationStatus::Mined(mined) => SubmissionResult::Mined(mined),
            OperationStatus::Failed { reason } => SubmissionResult::Failed { reason },
        }
    }
}

/// Receipt returned by `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    pub receipt: TransactionReceipt,
}

/// Transaction receipt as seen through chain access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainReceipt {
    pub transaction_hash: H256,
    pub success: bool,
    pub gas_used: U256,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTransaction {
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub timestamp: u64,
    pub transactions: Vec<BlockTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_operation_hash() {
        let op = UserOperation {
            sender: "0x921f125a92930cabb2969ad9323261d3a2a784e7".parse().unwrap(),
            nonce: 0.into(),
            init_code: "0x9406cc6185a346906296840746125a0e449764545fbfb9cf00000000000000000000000043378ff8c70109ee4dbe85af34428ab0615ebd230000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_data: "0xb61d27f6000000000000000000000000a02bfd0ba5d182226627a933333ba92d1a60e234000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000600000000000000000000000000000000000000000000000000000000000000000".parse().unwrap(),
            call_gas_limit: 530_100.into(),
            verification_gas_limit: 500_624.into(),
            pre_verification_gas: 104_056.into(),
            max_fee_per_gas: 1_695_000_030u64.into(),
            max_priority_fee_per_gas: 1_695_000_000u64.into(),
            paymaster_and_data: Bytes::default(),
            signature: "0x5ae30c60c3ad36192f6efc38b3ac41d70d2c08fd8efc5a2f2457bfc17a4deea72fb6b40081dc8e05da85a5f05b977d15a9583fbe0d1766357d2553ad233ddd2f1c".parse().unwrap(),
        };
        let entry_point: Address = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap();

        assert_eq!(
            op.hash(entry_point, 5),
            "0x7bca0c9a2ffbd23c25c7d5e1df0520142c0c39454cee778c3201eef6a8a27f06"
                .parse::<H256>()
                .unwrap()
        );
    }

    #[test]
    fn test_hash_ignores_signature() {
        let op = UserOperation {
            sender: Address::repeat_byte(0xaa),
            ..Default::default()
        };
        let entry_point = Address::repeat_byte(0x11);
        let signed = op.clone().with_signature(Bytes::from(vec![1u8; 65]));

        assert_eq!(op.hash(entry_point, 1), signed.hash(entry_point, 1));
        assert_ne!(op.hash(entry_point, 1), op.hash(entry_point, 2));
    }

    #[test]
    fn test_user_operation_serializes_camel_case() {
        let op = UserOperation {
            call_gas_limit: 500_000.into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&op).unwrap();

        assert_eq!(value["callGasLimit"], "0x7a120");
        assert_eq!(value["paymasterAndData"], "0x");
    }

    #[test]
    fn test_submission_result_tagging() {
        let result = SubmissionResult::Failed {
            reason: "reverted".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"], "reverted");
    }
}
