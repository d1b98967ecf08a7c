// src/calls.rs
//! Calldata for the demo actions. Every action is routed through the smart
//! account's `execute(dest, value, func)` entry point.
use ethers::abi::AbiEncode;
use ethers::contract::EthCall;
use ethers::types::{Address, Bytes, U256};

use crate::bindings::{ExecuteBatchCall, ExecuteCall, MintCall, SwapCall, TransferCall};

pub fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).and_then(|s| s.try_into().ok())
}

/// Wrap an inner call into the account's generic entry point.
pub fn execute(dest: Address, value: U256, func: Bytes) -> Bytes {
    ExecuteCall { dest, value, func }.encode().into()
}

/// True when the calldata already targets `execute` or `executeBatch`.
pub fn is_account_call(data: &[u8]) -> bool {
    matches!(
        selector(data),
        Some(s) if s == ExecuteCall::selector() || s == ExecuteBatchCall::selector()
    )
}

pub fn transfer_token(token: Address, to: Address, amount: U256) -> Bytes {
    let inner = TransferCall { to, amount }.encode();
    execute(token, U256::zero(), inner.into())
}

pub fn mint_nft(nft: Address, to: Address) -> Bytes {
    let inner = MintCall { to }.encode();
    execute(nft, U256::zero(), inner.into())
}

pub fn swap_tokens(
    dex: Address,
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    amount_out_min: U256,
) -> Bytes {
    let inner = SwapCall {
        token_in,
        token_out,
        amount_in,
        amount_out_min,
    }
    .encode();
    execute(dex, U256::zero(), inner.into())
}

/// Calldata for an owner-signed transaction to `sender` that reproduces the
/// operation without the EntryPoint.
pub fn direct_call_data(sender: Address, call_data: &Bytes) -> Bytes {
    if call_data.is_empty() || is_account_call(call_data) {
        call_data.clone()
    } else {
        execute(sender, U256::zero(), call_data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiDecode;

    #[test]
    fn test_execute_selector() {
        let encoded = execute(Address::repeat_byte(0x42), U256::from(1), Bytes::new());
        assert_eq!(&encoded[..4], &[0xb6, 0x1d, 0x27, 0xf6]);
        assert!(is_account_call(&encoded));
    }

    #[test]
    fn test_transfer_token_wraps_erc20_transfer() {
        let token = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let encoded = transfer_token(token, to, U256::from(1_000));

        let call = ExecuteCall::decode(&encoded).unwrap();
        assert_eq!(call.dest, token);
        assert_eq!(call.value, U256::zero());
        assert_eq!(&call.func[..4], &[0xa9, 0x05, 0x9c, 0xbb]);

        let inner = TransferCall::decode(&call.func).unwrap();
        assert_eq!(inner.to, to);
        assert_eq!(inner.amount, U256::from(1_000));
    }

    #[test]
    fn test_direct_call_data_routing() {
        let sender = Address::repeat_byte(0xaa);

        assert!(direct_call_data(sender, &Bytes::new()).is_empty());

        let wrapped = mint_nft(Address::repeat_byte(0x03), sender);
        assert_eq!(direct_call_data(sender, &wrapped), wrapped);

        let raw = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
        let routed = direct_call_data(sender, &raw);
        let call = ExecuteCall::decode(&routed).unwrap();
        assert_eq!(call.dest, sender);
        assert_eq!(call.func, raw);
    }

    #[test]
    fn test_selector_needs_four_bytes() {
        assert_eq!(selector(&[0x01, 0x02, 0x03]), None);
        assert_eq!(selector(&[0x01, 0x02, 0x03, 0x04, 0x05]), Some([1, 2, 3, 4]));
    }
}
