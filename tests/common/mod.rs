//! In-process EVM node for integration tests
//!
//! Implements just enough JSON-RPC for the gateway: balances, nonces, gas,
//! raw transaction intake (decoded and signature-checked), receipts and a
//! single-slot storage contract (`get()` / `set(uint256)` / `fail()`).

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, MockError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Block, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::rlp::Rlp;
use ethers::utils::{get_contract_address, id, keccak256};
use evm_gateway::config::GatewayOptions;
use evm_gateway::error::GatewayError;
use evm_gateway::Gateway;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NODE_URL: &str = "http://fake-node.local:8545";
pub const CHAIN_ID: u64 = 31337;

// First two Hardhat/Anvil development accounts
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const OTHER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const OTHER_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

pub const TRANSFER_GAS: u64 = 21_000;
pub const CALL_GAS: u64 = 45_000;
pub const DEPLOY_GAS: u64 = 150_000;

pub const STORAGE_BYTECODE: &str = "0x6080604052348015600f57600080fd5b50";

pub fn storage_abi() -> Value {
    json!([
        {
            "type": "function",
            "name": "get",
            "stateMutability": "view",
            "inputs": [],
            "outputs": [{"name": "", "type": "uint256"}]
        },
        {
            "type": "function",
            "name": "set",
            "stateMutability": "nonpayable",
            "inputs": [{"name": "value", "type": "uint256"}],
            "outputs": []
        },
        {
            "type": "function",
            "name": "fail",
            "stateMutability": "nonpayable",
            "inputs": [],
            "outputs": []
        }
    ])
}

pub fn ether(amount: u64) -> U256 {
    U256::exp10(18) * amount
}

pub fn address(raw: &str) -> Address {
    raw.trim_start_matches("0x").parse().unwrap()
}

fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

/// One accepted raw transaction, as decoded by the node
#[derive(Debug, Clone)]
pub struct SeenTransaction {
    pub hash: H256,
    pub from: Address,
    pub tx: TypedTransaction,
}

#[derive(Debug, Clone)]
struct MinedReceipt {
    hash: H256,
    from: Address,
    to: Option<Address>,
    block: u64,
    success: bool,
    contract_address: Option<Address>,
    gas_used: U256,
}

#[derive(Debug)]
struct ChainState {
    chain_id: u64,
    reported_chain_id: Option<U256>,
    block_number: u64,
    gas_price: U256,
    base_fee: Option<U256>,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Bytes>,
    storage: HashMap<Address, U256>,
    receipts: HashMap<H256, MinedReceipt>,
    pending: Vec<MinedReceipt>,
    seen: Vec<SeenTransaction>,
    requests: Vec<String>,
    offline: bool,
    stall: Option<Duration>,
    auto_mine: bool,
    revert_deploys: bool,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            chain_id: CHAIN_ID,
            reported_chain_id: None,
            block_number: 1,
            gas_price: U256::from(1_000_000_000u64),
            base_fee: None,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            code: HashMap::new(),
            storage: HashMap::new(),
            receipts: HashMap::new(),
            pending: Vec::new(),
            seen: Vec::new(),
            requests: Vec::new(),
            offline: false,
            stall: None,
            auto_mine: true,
            revert_deploys: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    state: Arc<Mutex<ChainState>>,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn fund(&self, account: Address, wei: U256) {
        self.with_state(|s| {
            s.balances.insert(account, wei);
        });
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.with_state(|s| s.balances.get(&account).copied().unwrap_or_default())
    }

    pub fn nonce_of(&self, account: Address) -> u64 {
        self.with_state(|s| s.nonces.get(&account).copied().unwrap_or_default())
    }

    pub fn storage_of(&self, contract: Address) -> U256 {
        self.with_state(|s| s.storage.get(&contract).copied().unwrap_or_default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.with_state(|s| s.offline = offline);
    }

    /// Delay every answer, as a node that stopped responding would
    pub fn set_stall(&self, stall: Option<Duration>) {
        self.with_state(|s| s.stall = stall);
    }

    /// Answer `eth_chainId` with `chain_id` instead of the real one
    pub fn set_reported_chain_id(&self, chain_id: U256) {
        self.with_state(|s| s.reported_chain_id = Some(chain_id));
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.with_state(|s| s.gas_price = gas_price);
    }

    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.with_state(|s| s.auto_mine = auto_mine);
    }

    pub fn set_base_fee(&self, base_fee: Option<U256>) {
        self.with_state(|s| s.base_fee = base_fee);
    }

    pub fn set_revert_deploys(&self, revert: bool) {
        self.with_state(|s| s.revert_deploys = revert);
    }

    /// Mine everything sitting in the pool into one block
    pub fn mine_pending(&self) {
        self.with_state(|s| {
            s.block_number += 1;
            let block = s.block_number;
            for mut receipt in std::mem::take(&mut s.pending) {
                receipt.block = block;
                s.receipts.insert(receipt.hash, receipt);
            }
        });
    }

    pub fn seen_transactions(&self) -> Vec<SeenTransaction> {
        self.with_state(|s| s.seen.clone())
    }

    pub fn requests(&self) -> Vec<String> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn clear_requests(&self) {
        self.with_state(|s| s.requests.clear());
    }

    fn handle(&self, method: &str, params: Value) -> Result<Value, MockError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(method.to_string());

        if state.offline {
            return Err(MockError::EmptyResponses);
        }

        match method {
            "eth_blockNumber" => Ok(json!(U64::from(state.block_number))),
            "eth_chainId" => Ok(json!(state
                .reported_chain_id
                .unwrap_or_else(|| U256::from(state.chain_id)))),
            "eth_gasPrice" => Ok(json!(state.gas_price)),
            "eth_getBalance" => {
                let account: Address = param(&params, 0)?;
                Ok(json!(state.balances.get(&account).copied().unwrap_or_default()))
            }
            "eth_getTransactionCount" => {
                let account: Address = param(&params, 0)?;
                Ok(json!(U256::from(
                    state.nonces.get(&account).copied().unwrap_or_default()
                )))
            }
            "eth_getBlockByNumber" => {
                let block = Block::<H256> {
                    number: Some(U64::from(state.block_number)),
                    base_fee_per_gas: state.base_fee,
                    ..Default::default()
                };
                serde_json::to_value(block).map_err(MockError::SerdeJson)
            }
            "eth_estimateGas" => estimate(&state, &params[0]),
            "eth_call" => call(&state, &params[0]),
            "eth_sendRawTransaction" => {
                let raw: Bytes = param(&params, 0)?;
                accept(&mut state, raw)
            }
            "eth_getTransactionReceipt" => {
                let hash: H256 = param(&params, 0)?;
                match state.receipts.get(&hash) {
                    Some(mined) => serde_json::to_value(to_node_receipt(mined))
                        .map_err(MockError::SerdeJson),
                    None => Ok(Value::Null),
                }
            }
            other => Err(rpc_error(-32601, &format!("method {} not supported", other))),
        }
    }
}

#[async_trait]
impl JsonRpcClient for FakeNode {
    type Error = MockError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, MockError>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(MockError::SerdeJson)?;
        if let Some(stall) = self.with_state(|s| s.stall) {
            tokio::time::sleep(stall).await;
        }
        let response = self.handle(method, params)?;
        serde_json::from_value(response).map_err(MockError::SerdeJson)
    }
}

fn rpc_error(code: i64, message: &str) -> MockError {
    MockError::JsonRpcError(JsonRpcError {
        code,
        message: message.to_string(),
        data: None,
    })
}

fn param<T: DeserializeOwned>(params: &Value, index: usize) -> Result<T, MockError> {
    serde_json::from_value(params[index].clone()).map_err(MockError::SerdeJson)
}

fn field<T: DeserializeOwned>(tx: &Value, name: &str) -> Result<Option<T>, MockError> {
    match tx.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(MockError::SerdeJson),
    }
}

fn call_data(tx: &Value) -> Result<Bytes, MockError> {
    match field::<Bytes>(tx, "data")? {
        Some(data) => Ok(data),
        None => Ok(field::<Bytes>(tx, "input")?.unwrap_or_default()),
    }
}

fn estimate(state: &ChainState, tx: &Value) -> Result<Value, MockError> {
    let from: Address = field(tx, "from")?.unwrap_or_default();
    let to: Option<Address> = field(tx, "to")?;
    let value: U256 = field(tx, "value")?.unwrap_or_default();
    let data = call_data(tx)?;

    let balance = state.balances.get(&from).copied().unwrap_or_default();
    if value > balance {
        return Err(rpc_error(-32000, "insufficient funds for transfer"));
    }

    let gas = match to {
        None => DEPLOY_GAS,
        Some(to) if state.code.contains_key(&to) => {
            if data.len() >= 4 && data[..4] == selector("fail()") {
                return Err(rpc_error(3, "execution reverted: always fails"));
            }
            CALL_GAS
        }
        Some(_) if data.is_empty() => TRANSFER_GAS,
        Some(_) => CALL_GAS,
    };
    Ok(json!(U256::from(gas)))
}

fn call(state: &ChainState, tx: &Value) -> Result<Value, MockError> {
    let to: Address = field(tx, "to")?.unwrap_or_default();
    let data = call_data(tx)?;

    if !state.code.contains_key(&to) || data.len() < 4 {
        return Ok(json!(Bytes::new()));
    }
    if data[..4] == selector("get()") {
        let value = state.storage.get(&to).copied().unwrap_or_default();
        let encoded = ethers::abi::encode(&[ethers::abi::Token::Uint(value)]);
        return Ok(json!(Bytes::from(encoded)));
    }
    if data[..4] == selector("fail()") {
        return Err(rpc_error(3, "execution reverted: always fails"));
    }
    Ok(json!(Bytes::new()))
}

fn accept(state: &mut ChainState, raw: Bytes) -> Result<Value, MockError> {
    let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(&raw))
        .map_err(|e| rpc_error(-32602, &format!("invalid raw transaction: {}", e)))?;
    let from = match tx.from() {
        Some(from) => *from,
        None => signature
            .recover(tx.sighash())
            .map_err(|e| rpc_error(-32602, &format!("invalid signature: {}", e)))?,
    };

    if tx.chain_id().map(|c| c.as_u64()) != Some(state.chain_id) {
        return Err(rpc_error(-32000, "invalid chain id for signer"));
    }

    let expected = state.nonces.get(&from).copied().unwrap_or_default();
    let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
    if nonce < expected {
        return Err(rpc_error(-32000, "nonce too low"));
    }
    if nonce > expected {
        return Err(rpc_error(-32000, "nonce too high"));
    }

    let value = tx.value().copied().unwrap_or_default();
    let gas_limit = tx.gas().copied().unwrap_or_default();
    let cost = gas_limit * tx.gas_price().unwrap_or_default() + value;
    let balance = state.balances.get(&from).copied().unwrap_or_default();
    if cost > balance {
        return Err(rpc_error(
            -32000,
            "insufficient funds for gas * price + value",
        ));
    }

    let hash = H256::from(keccak256(&raw));
    let to = tx.to_addr().copied();
    let data = tx.data().cloned().unwrap_or_default();

    state.balances.insert(from, balance - cost);
    state.nonces.insert(from, expected + 1);
    if let Some(to) = to {
        *state.balances.entry(to).or_default() += value;
    }

    let mut success = true;
    let mut contract_address = None;
    match to {
        None if state.revert_deploys => success = false,
        None => {
            let created = get_contract_address(from, nonce);
            state.code.insert(created, data.clone());
            contract_address = Some(created);
        }
        Some(to) if state.code.contains_key(&to) && data.len() >= 4 => {
            if data[..4] == selector("set(uint256)") && data.len() == 36 {
                state.storage.insert(to, U256::from_big_endian(&data[4..36]));
            } else if data[..4] == selector("fail()") {
                success = false;
            }
        }
        Some(_) => {}
    }

    state.seen.push(SeenTransaction {
        hash,
        from,
        tx: tx.clone(),
    });

    let receipt = MinedReceipt {
        hash,
        from,
        to,
        block: 0,
        success,
        contract_address,
        gas_used: gas_limit,
    };
    if state.auto_mine {
        state.block_number += 1;
        let mined = MinedReceipt {
            block: state.block_number,
            ..receipt
        };
        state.receipts.insert(hash, mined);
    } else {
        state.pending.push(receipt);
    }

    Ok(json!(hash))
}

fn to_node_receipt(mined: &MinedReceipt) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: mined.hash,
        block_number: Some(U64::from(mined.block)),
        from: mined.from,
        to: mined.to,
        contract_address: mined.contract_address,
        gas_used: Some(mined.gas_used),
        cumulative_gas_used: mined.gas_used,
        status: Some(U64::from(u64::from(mined.success))),
        ..Default::default()
    }
}

/// Options with short polling so tests finish quickly
pub fn fast_options() -> GatewayOptions {
    GatewayOptions {
        poll_interval: Duration::from_millis(5),
        transfer_timeout: Duration::from_secs(5),
        deploy_timeout: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(1),
        rpc_timeout: Duration::from_secs(1),
        broadcast_timeout: Duration::from_secs(1),
        ..GatewayOptions::default()
    }
}

/// Gateway whose dialer resolves `NODE_URL` to `node` and refuses anything else
pub fn gateway_for(node: &FakeNode, options: GatewayOptions) -> Gateway<FakeNode> {
    let node = node.clone();
    Gateway::with_dialer(
        options,
        Arc::new(move |url: &str| {
            if url == NODE_URL {
                Ok(node.clone())
            } else {
                Err(GatewayError::Connection(format!(
                    "connection refused: {}",
                    url
                )))
            }
        }),
    )
}

/// Configured gateway with the funded development account set
pub async fn funded_gateway(node: &FakeNode, funds: U256) -> Gateway<FakeNode> {
    node.fund(address(DEV_ADDRESS), funds);
    let gateway = gateway_for(node, fast_options());
    gateway.configure_node(NODE_URL).await.unwrap();
    gateway.set_account(DEV_KEY).await.unwrap();
    gateway
}
