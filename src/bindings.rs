// src/bindings.rs
#![allow(clippy::all)]
use ethers::prelude::abigen;

abigen!(
    SimpleAccount,
    r#"[
        function getNonce() external view returns (uint256)
        function execute(address dest, uint256 value, bytes func) external
        function executeBatch(address[] dest, uint256[] value, bytes[] func) external
        function initialize(address owner) external
    ]"#,
);

abigen!(
    AccountFactory,
    r#"[
        function createAccount(address owner, uint256 salt) external returns (address)
        function getAddress(address owner, uint256 salt) external view returns (address)
        function accountImplementation() external view returns (address)
    ]"#,
);

abigen!(
    DemoToken,
    r#"[
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#,
);

abigen!(
    DemoNft,
    r#"[
        function mint(address to) external payable
    ]"#,
);

abigen!(
    SimpleDex,
    r#"[
        function swap(address tokenIn, address tokenOut, uint256 amountIn, uint256 amountOutMin) external
    ]"#,
);
