// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod accounts;
mod bindings;
mod bundler;
mod calls;
mod chain;
mod config;
mod error;
mod history;
mod lifecycle;
mod rpc;
mod sponsor;
mod types;

use crate::bundler::HttpBundler;
use crate::chain::EthersChain;
use crate::config::{LifecycleConfig, SponsorConfig, ENTRY_POINT_V06};
use crate::history::TransactionIndexer;
use crate::lifecycle::OperationManager;
use crate::rpc::LifecycleRpcImpl;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "RPC_SERVER_ADDR", default_value = "127.0.0.1:8545")]
    rpc_server_addr: String,

    /// Owner key: signs user operations and pays for direct fallback transactions
    #[clap(short, long, env = "PRIVATE_KEY")]
    private_key: String,

    #[clap(short, long, env = "CHAIN_ID")]
    chain_id: u64,

    #[clap(short, long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    #[clap(short, long, env = "BUNDLER_URL")]
    bundler_url: String,

    #[clap(long, env = "ENTRY_POINT", default_value = ENTRY_POINT_V06)]
    entry_point: Address,

    #[clap(long, env = "ACCOUNT_FACTORY")]
    account_factory: Option<Address>,

    #[clap(long, env = "ACCOUNT_SALT", default_value = "0")]
    account_salt: u64,

    #[clap(long, env = "PAYMASTER_ADDRESS")]
    paymaster: Option<Address>,

    #[clap(long, env = "GAS_POLICY_ID")]
    policy_id: Option<String>,

    /// Seconds a sponsorship stays valid after the operation is built
    #[clap(long, env = "SPONSOR_VALID_SECS", default_value = "3600")]
    sponsor_valid_secs: u64,

    /// Hex-encoded ERC1967 proxy creation code for offline address computation
    #[clap(long, env = "PROXY_CREATION_CODE")]
    proxy_creation_code: Option<Bytes>,

    #[clap(long, env = "POLL_BACKOFF_MS", default_value = "2000")]
    poll_backoff_ms: u64,

    #[clap(long, env = "MAX_WAIT_MS", default_value = "30000")]
    max_wait_ms: u64,

    #[clap(long, env = "HISTORY_LOOKBACK", default_value = "1000")]
    history_lookback: u64,
}

impl Args {
    fn lifecycle_config(&self) -> LifecycleConfig {
        let mut config = LifecycleConfig::new(self.chain_id, self.entry_point);
        config.account_factory = self.account_factory;
        config.account_salt = U256::from(self.account_salt);
        config.proxy_creation_code = self.proxy_creation_code.clone();
        config.sponsor = SponsorConfig {
            paymaster: self.paymaster,
            policy_id: self.policy_id.clone(),
            valid_duration: self.sponsor_valid_secs,
        };
        config.poll_backoff = Duration::from_millis(self.poll_backoff_ms);
        config.max_wait = Duration::from_millis(self.max_wait_ms);
        config.history_lookback = self.history_lookback;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = args.lifecycle_config();

    let owner = args
        .private_key
        .parse::<LocalWallet>()?
        .with_chain_id(config.chain_id);
    let chain = Arc::new(EthersChain::new(&args.eth_rpc_url)?);
    let bundler = Arc::new(HttpBundler::new(&args.bundler_url, args.policy_id.as_deref())?);

    if !config.sponsor.is_configured() {
        info!("No gas policy configured; operations will not be sponsored");
    }

    let indexer = TransactionIndexer::new(
        chain.clone(),
        config.account_factory,
        config.history_lookback,
    );
    let manager = OperationManager::new(config, chain, bundler, owner);

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let lifecycle_rpc = LifecycleRpcImpl::new(Arc::new(manager), Arc::new(indexer));

    info!("Starting ERC-4337 operation RPC server on {}", server_addr);

    let server_handle = start_server(server_addr, lifecycle_rpc).await?;

    // Keep the server running until Ctrl+C is pressed
    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server(
    server_addr: SocketAddr,
    lifecycle_rpc: LifecycleRpcImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;

    let mut module = RpcModule::new(lifecycle_rpc);
    rpc::register_methods(&mut module)?;
    let server_handle = server.start(module);

    Ok(server_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_build_config() {
        let args = Args::parse_from([
            "arka-relay",
            "--private-key",
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            "--chain-id",
            "31337",
            "--eth-rpc-url",
            "http://localhost:8545",
            "--bundler-url",
            "http://localhost:3000/rpc",
            "--policy-id",
            "policy-1",
            "--paymaster",
            "0x5959595959595959595959595959595959595959",
            "--max-wait-ms",
            "0",
        ]);
        let config = args.lifecycle_config();

        assert_eq!(config.entry_point, ENTRY_POINT_V06.parse::<Address>().unwrap());
        assert!(config.sponsor.is_configured());
        assert_eq!(config.max_wait, Duration::ZERO);
        assert_eq!(config.poll_backoff, Duration::from_secs(2));
    }
}
