// src/accounts.rs
//! Counterfactual smart account addresses.
//!
//! The factory's `getAddress` is authoritative. Manual CREATE2 derivation is
//! only attempted when the factory cannot answer (or answers with its own
//! address) and the proxy creation code has been configured.
use std::sync::Arc;

use ethers::abi::{encode, AbiDecode, AbiEncode, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use tracing::{info, warn};

use crate::bindings::{AccountImplementationCall, CreateAccountCall, GetAddressCall, InitializeCall};
use crate::chain::ChainAccess;
use crate::error::LifecycleError;

pub struct AccountResolver {
    chain: Arc<dyn ChainAccess>,
    factory: Option<Address>,
    proxy_creation_code: Option<Bytes>,
}

impl AccountResolver {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        factory: Option<Address>,
        proxy_creation_code: Option<Bytes>,
    ) -> Self {
        Self {
            chain,
            factory,
            proxy_creation_code,
        }
    }

    /// `factory ‖ createAccount(owner, salt)`, or `None` without a factory.
    pub fn init_code(&self, owner: Address, salt: U256) -> Option<Bytes> {
        self.factory.map(|factory| {
            let mut data = factory.as_bytes().to_vec();
            data.extend(CreateAccountCall { owner, salt }.encode());
            Bytes::from(data)
        })
    }

    pub async fn counterfactual_address(
        &self,
        owner: Address,
        salt: U256,
    ) -> Result<Address, LifecycleError> {
        let factory = self.factory.ok_or_else(|| {
            LifecycleError::AccountUnavailable("account factory is not configured".to_string())
        })?;

        let reported = self
            .chain
            .call(factory, GetAddressCall { owner, salt }.encode().into())
            .await
            .map_err(|e| e.to_string())
            .and_then(|raw| Address::decode(raw).map_err(|e| e.to_string()));

        match reported {
            Ok(address) if address != factory => return Ok(address),
            Ok(_) => warn!("Factory {:?} reported its own address for {:?}", factory, owner),
            Err(e) => warn!("Factory getAddress failed: {}", e),
        }

        let proxy_code = self.proxy_creation_code.as_ref().ok_or_else(|| {
            LifecycleError::AccountUnavailable(format!(
                "factory {factory:?} cannot compute the account address"
            ))
        })?;

        let implementation = self.implementation(factory).await?;
        let address = create2_address(
            factory,
            salt,
            &proxy_init_code(proxy_code, implementation, owner),
        );
        info!("Computed account address {:?} via CREATE2", address);
        Ok(address)
    }

    async fn implementation(&self, factory: Address) -> Result<Address, LifecycleError> {
        let raw = self
            .chain
            .call(factory, AccountImplementationCall.encode().into())
            .await?;
        Address::decode(raw).map_err(|e| LifecycleError::AccountUnavailable(e.to_string()))
    }
}

/// Proxy creation code followed by `abi.encode(implementation, initialize(owner))`.
fn proxy_init_code(proxy_code: &Bytes, implementation: Address, owner: Address) -> Vec<u8> {
    let init_data = InitializeCall { owner }.encode();
    let constructor_args = encode(&[Token::Address(implementation), Token::Bytes(init_data)]);

    let mut init_code = proxy_code.to_vec();
    init_code.extend(constructor_args);
    init_code
}

pub fn create2_address(deployer: Address, salt: U256, init_code: &[u8]) -> Address {
    let mut salt_bytes = [0u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    get_create2_address_from_hash(deployer, salt_bytes, keccak256(init_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainAccess;
    use crate::error::AccessError;
    use ethers::contract::EthCall;

    const FACTORY: [u8; 20] = [0x9a; 20];

    fn factory() -> Address {
        Address::from(FACTORY)
    }

    #[test]
    fn test_create2_matches_eip1014_vector() {
        let address = create2_address(Address::zero(), U256::zero(), &[0x00]);
        assert_eq!(
            address,
            "0x4D1A2e2bB4F88F0250f26Ffff098B0b30B26BF38"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_init_code_prefixes_factory() {
        let chain = Arc::new(MockChainAccess::new());
        let resolver = AccountResolver::new(chain, Some(factory()), None);
        let init_code = resolver.init_code(Address::repeat_byte(0x01), U256::zero()).unwrap();

        assert_eq!(&init_code[..20], factory().as_bytes());
        assert_eq!(&init_code[20..24], &CreateAccountCall::selector());
    }

    #[tokio::test]
    async fn test_factory_address_is_authoritative() {
        let account = Address::repeat_byte(0xaa);
        let mut chain = MockChainAccess::new();
        chain
            .expect_call()
            .times(1)
            .returning(move |_, _| Ok(account.encode().into()));

        let resolver = AccountResolver::new(Arc::new(chain), Some(factory()), Some(Bytes::from(vec![0x60])));
        let resolved = resolver
            .counterfactual_address(Address::repeat_byte(0x01), U256::zero())
            .await
            .unwrap();

        assert_eq!(resolved, account);
    }

    #[tokio::test]
    async fn test_self_address_falls_back_to_create2() {
        let owner = Address::repeat_byte(0x01);
        let implementation = Address::repeat_byte(0x2b);
        let proxy_code = Bytes::from(vec![0x60, 0x80, 0x60, 0x40]);

        let mut chain = MockChainAccess::new();
        chain.expect_call().times(2).returning(move |_, data| {
            if data[..4] == GetAddressCall::selector() {
                Ok(factory().encode().into())
            } else {
                Ok(implementation.encode().into())
            }
        });

        let resolver = AccountResolver::new(Arc::new(chain), Some(factory()), Some(proxy_code.clone()));
        let resolved = resolver
            .counterfactual_address(owner, U256::from(7))
            .await
            .unwrap();

        let expected = create2_address(
            factory(),
            U256::from(7),
            &proxy_init_code(&proxy_code, implementation, owner),
        );
        assert_eq!(resolved, expected);
        assert_ne!(resolved, factory());
    }

    #[tokio::test]
    async fn test_unusable_factory_without_proxy_code_is_unavailable() {
        let mut chain = MockChainAccess::new();
        chain
            .expect_call()
            .returning(|_, _| Err(AccessError::Transport("connection refused".to_string())));

        let resolver = AccountResolver::new(Arc::new(chain), Some(factory()), None);
        let result = resolver
            .counterfactual_address(Address::repeat_byte(0x01), U256::zero())
            .await;

        assert!(matches!(result, Err(LifecycleError::AccountUnavailable(_))));
    }
}
