// src/bundler.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::{Address, H256};
#[cfg(test)]
use mockall::automock;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use tracing::debug;

use crate::error::AccessError;
use crate::types::{UserOperation, UserOperationReceipt};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLICY_HEADER: &str = "Alchemy-Gas-Manager-Policy-Id";

/// ERC-4337 bundler JSON-RPC endpoint.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BundlerAccess: Send + Sync + 'static {
    /// `eth_sendUserOperation`; returns the user operation hash.
    async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, AccessError>;

    /// `eth_getUserOperationReceipt`; `None` until the operation is included.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, AccessError>;
}

fn classify(e: ProviderError) -> AccessError {
    match e.as_error_response() {
        Some(rpc) => AccessError::Rejected {
            code: rpc.code,
            message: rpc.message.clone(),
        },
        None => AccessError::Transport(e.to_string()),
    }
}

pub struct HttpBundler {
    client: Provider<Http>,
}

impl HttpBundler {
    /// Connect to a bundler. A gas policy id, when given, is sent as a header on
    /// every request so the provider's gas manager can sponsor operations.
    pub fn new(bundler_url: &str, policy_id: Option<&str>) -> anyhow::Result<Self> {
        let url = Url::parse(bundler_url)?;

        let mut headers = HeaderMap::new();
        if let Some(policy_id) = policy_id.filter(|id| !id.is_empty()) {
            headers.insert(POLICY_HEADER, HeaderValue::from_str(policy_id)?);
        }
        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client: Provider::new(Http::new_with_client(url, http_client)),
        })
    }
}

#[async_trait]
impl BundlerAccess for HttpBundler {
    async fn send_user_operation(
        &self,
        user_op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, AccessError> {
        debug!("eth_sendUserOperation for sender {:?}", user_op.sender);
        self.client
            .request("eth_sendUserOperation", (user_op.clone(), entry_point))
            .await
            .map_err(classify)
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, AccessError> {
        self.client
            .request("eth_getUserOperationReceipt", [user_op_hash])
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundler_rejects_bad_url() {
        assert!(HttpBundler::new("not a url", None).is_err());
    }

    #[test]
    fn test_bundler_accepts_policy_header() {
        assert!(HttpBundler::new("http://localhost:3000/rpc", Some("policy-1")).is_ok());
        assert!(HttpBundler::new("http://localhost:3000/rpc", Some("bad\nvalue")).is_err());
    }

    #[test]
    fn test_receipt_deserializes_without_optional_fields() {
        let raw = serde_json::json!({
            "userOpHash": format!("{:?}", H256::repeat_byte(0x01)),
            "sender": format!("{:?}", Address::repeat_byte(0xaa)),
            "nonce": "0x1",
            "actualGasCost": "0x10",
            "actualGasUsed": "0x5208",
            "success": true,
            "receipt": {
                "transactionHash": format!("{:?}", H256::repeat_byte(0x02)),
                "transactionIndex": "0x0",
                "from": format!("{:?}", Address::repeat_byte(0xbb)),
                "cumulativeGasUsed": "0x5208",
                "logs": [],
                "logsBloom": format!("0x{}", "00".repeat(256)),
                "status": "0x1"
            }
        });

        let receipt: UserOperationReceipt = serde_json::from_value(raw).unwrap();
        assert!(receipt.success);
        assert!(receipt.reason.is_none());
        assert_eq!(receipt.receipt.transaction_hash, H256::repeat_byte(0x02));
    }
}
