//! Gateway session: the single entry point for chain operations
//!
//! A `Gateway` owns the node connection and the signing account for one
//! logical session. Nothing lives in global state; callers share the gateway
//! through an `Arc`. Build, sign and broadcast run under one submission lock
//! so concurrent writes from the same account never read the same nonce.

use crate::account::{AccountSession, KeyOrigin};
use crate::chain::{
    ConnectionPhase, Dialer, LiveNode, NodeConnection, NodeEndpoint, NodeStatus, ReceiptStatus,
    ReceiptWaiter, TransactionReceipt, TxStatus,
};
use crate::config::GatewayOptions;
use crate::contract::{self, codec, Access, ContractDescriptor};
use crate::error::{ErrorReport, GatewayError, GatewayResult};
use crate::metrics;
use crate::tx::{FeeEstimator, TransactionBuilder, TransactionSender, TxIntent};

use ethers::providers::{Http, JsonRpcClient, Middleware};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::{format_ether, parse_ether, to_checksum};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Parameters for a gas simulation
#[derive(Debug, Clone, Deserialize)]
pub struct EstimateRequest {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    /// Ether amount as a decimal string
    #[serde(default, deserialize_with = "optional_decimal")]
    pub value: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Plain value transfer from the session account
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub to: String,
    /// Ether amount as a decimal string, e.g. `"0.5"`
    #[serde(deserialize_with = "decimal")]
    pub amount: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub bytecode: String,
    pub abi: Value,
    #[serde(default)]
    pub constructor_args: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    pub abi: Value,
    pub address: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Ether sent along with a payable method
    #[serde(default, deserialize_with = "optional_decimal")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub address: String,
    pub wei: String,
    pub ether: String,
}

/// Confirmed result of a state-changing transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxOutcome {
    pub hash: H256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

impl From<&TransactionReceipt> for TxOutcome {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            hash: receipt.hash,
            status: receipt.status,
            block_number: receipt.block_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub address: String,
    pub hash: H256,
    pub block_number: Option<u64>,
}

/// Result of a contract method invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Invocation {
    Read { result: Value },
    Write(TxOutcome),
}

/// Structured boundary result: either a value or a tagged error payload
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply<T> {
    Success { result: T },
    Error(ErrorReport),
}

impl<T> From<GatewayResult<T>> for Reply<T> {
    fn from(result: GatewayResult<T>) -> Self {
        match result {
            Ok(result) => Reply::Success { result },
            Err(e) => Reply::Error(ErrorReport::from(&e)),
        }
    }
}

impl<T> Reply<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success { .. })
    }
}

/// One operator session against one EVM node
pub struct Gateway<C: JsonRpcClient = Http> {
    connection: NodeConnection<C>,
    accounts: AccountSession,
    builder: TransactionBuilder,
    sender: TransactionSender,
    receipts: ReceiptWaiter,
    submit_lock: Mutex<()>,
    options: GatewayOptions,
}

impl Gateway<Http> {
    /// Gateway speaking HTTP JSON-RPC
    pub fn new(options: GatewayOptions) -> Self {
        let connection = NodeConnection::http(options.probe_timeout, options.rpc_timeout);
        Self::assemble(connection, options)
    }
}

impl<C: JsonRpcClient + 'static> Gateway<C> {
    /// Gateway over a custom transport
    pub fn with_dialer(options: GatewayOptions, dialer: Dialer<C>) -> Self {
        let connection = NodeConnection::new(dialer, options.probe_timeout, options.rpc_timeout);
        Self::assemble(connection, options)
    }

    fn assemble(connection: NodeConnection<C>, options: GatewayOptions) -> Self {
        Self {
            connection,
            accounts: AccountSession::new(),
            builder: TransactionBuilder::new(FeeEstimator::new(options.fees.clone())),
            sender: TransactionSender::new(options.broadcast_timeout),
            receipts: ReceiptWaiter::new(options.poll_interval),
            submit_lock: Mutex::new(()),
            options,
        }
    }

    pub async fn connection_phase(&self) -> ConnectionPhase {
        self.connection.phase().await
    }

    pub async fn endpoint(&self) -> Option<NodeEndpoint> {
        self.connection.endpoint().await
    }

    /// Point the session at a node. A failed attempt keeps the previous endpoint.
    pub async fn configure_node(&self, url: &str) -> GatewayResult<NodeStatus> {
        finish("configure_node", self.connection.configure(url).await)
    }

    /// Install the signing key and return its checksummed address
    pub async fn set_account(&self, private_key: &str) -> GatewayResult<String> {
        let result = self.install_account(private_key, KeyOrigin::Supplied).await;
        finish("set_account", result)
    }

    /// Install the signing key held in environment variable `var`
    pub async fn set_account_from_env(&self, var: &str) -> GatewayResult<String> {
        let result = match std::env::var(var) {
            Ok(key) => {
                self.install_account(
                    &key,
                    KeyOrigin::Environment {
                        var: var.to_string(),
                    },
                )
                .await
            }
            Err(_) => Err(GatewayError::Validation(format!(
                "Environment variable {} is not set",
                var
            ))),
        };
        finish("set_account", result)
    }

    async fn install_account(&self, private_key: &str, origin: KeyOrigin) -> GatewayResult<String> {
        // Accounts only make sense against a reachable node
        self.connection.ensure_connected().await?;
        let address = self.accounts.set(private_key, origin).await?;
        Ok(to_checksum(&address, None))
    }

    pub async fn clear_account(&self) {
        self.accounts.clear().await;
        metrics::record_operation("clear_account", Ok(()));
    }

    pub async fn current_address(&self) -> Option<Address> {
        self.accounts.current_address().await
    }

    pub async fn get_balance(&self, address: &str) -> GatewayResult<Balance> {
        let result: GatewayResult<Balance> = async {
            let address = codec::parse_address_str(address)?;
            let node = self.connection.ensure_connected().await?;
            let wei = node
                .request("balance lookup", node.provider().get_balance(address, None))
                .await?;
            Ok(Balance {
                address: to_checksum(&address, None),
                wei: wei.to_string(),
                ether: format_ether(wei),
            })
        }
        .await;
        finish("get_balance", result)
    }

    /// Simulate a transaction and return the gas units it would use
    pub async fn estimate_gas(&self, request: EstimateRequest) -> GatewayResult<u64> {
        let result: GatewayResult<u64> = async {
            let from = codec::parse_address_str(&request.from)?;
            let mut tx = TransactionRequest::new().from(from);
            if let Some(to) = &request.to {
                tx = tx.to(codec::parse_address_str(to)?);
            }
            if let Some(value) = &request.value {
                tx = tx.value(parse_amount(value)?);
            }
            if let Some(data) = &request.data {
                let data = codec::parse_hex_str(data)?;
                if !data.is_empty() {
                    tx = tx.data(data);
                }
            }

            let node = self.connection.ensure_connected().await?;
            let gas = self
                .builder
                .fees()
                .estimate_gas(&node, &TypedTransaction::Legacy(tx))
                .await?;
            gas_units(gas)
        }
        .await;
        finish("estimate_gas", result)
    }

    /// Transfer ether and wait for the receipt
    pub async fn send_value(&self, request: TransferRequest) -> GatewayResult<TxOutcome> {
        let result: GatewayResult<TxOutcome> = async {
            let to = codec::parse_address_str(&request.to)?;
            let value = parse_amount(&request.amount)?;

            let receipt = self
                .submit(TxIntent::transfer(to, value), self.options.transfer_timeout)
                .await?;
            Ok(TxOutcome::from(&receipt))
        }
        .await;
        finish("send_value", result)
    }

    /// Deploy creation code and return the new contract's address
    pub async fn deploy_contract(&self, request: DeployRequest) -> GatewayResult<Deployment> {
        let result: GatewayResult<Deployment> = async {
            let abi = contract::parse_abi(&request.abi)?;
            let bytecode = codec::parse_hex_str(&request.bytecode)?;
            if bytecode.is_empty() {
                return Err(GatewayError::Validation("Bytecode is empty".to_string()));
            }
            let code = contract::deployment_code(&abi, bytecode, &request.constructor_args)?;

            let intent = TxIntent::deploy(code, self.options.fees.deploy_gas_headroom);
            let receipt = self.submit(intent, self.options.deploy_timeout).await?;

            if receipt.status == ReceiptStatus::Failure {
                return Err(GatewayError::ContractLogic {
                    message: format!("Deployment transaction {:?} reverted", receipt.hash),
                });
            }
            let address = receipt.contract_address.ok_or_else(|| {
                GatewayError::Internal(format!(
                    "Receipt for {:?} carries no contract address",
                    receipt.hash
                ))
            })?;

            info!("Contract deployed at {:?} by {:?}", address, receipt.hash);
            Ok(Deployment {
                address: to_checksum(&address, None),
                hash: receipt.hash,
                block_number: receipt.block_number,
            })
        }
        .await;
        finish("deploy_contract", result)
    }

    /// Classify the method from its ABI entry, then call or transact
    pub async fn invoke_method(&self, request: InvokeRequest) -> GatewayResult<Invocation> {
        let result: GatewayResult<Invocation> = async {
            let contract = ContractDescriptor::from_json(&request.address, &request.abi)?;
            let method = contract.lookup(&request.method, request.args.len())?;
            let data = method.encode_call(&request.args)?;
            let value = match &request.value {
                Some(raw) => parse_amount(raw)?,
                None => U256::zero(),
            };

            match method.access() {
                Access::Read => {
                    if !value.is_zero() {
                        return Err(GatewayError::Validation(format!(
                            "{} is read-only and cannot receive value",
                            method.signature()
                        )));
                    }
                    let node = self.connection.ensure_connected().await?;
                    let output = self.call(&node, contract.address(), data).await?;
                    let result = method.decode_output(&output)?;
                    debug!("{} on {:?} returned {}", method.signature(), contract.address(), result);
                    Ok(Invocation::Read { result })
                }
                Access::Write => {
                    if !value.is_zero() && !method.is_payable() {
                        return Err(GatewayError::Validation(format!(
                            "{} is not payable",
                            method.signature()
                        )));
                    }
                    info!("Sending {} to {:?}", method.name(), contract.address());
                    let intent = TxIntent::call(contract.address(), data, value);
                    let receipt = self.submit(intent, self.options.transfer_timeout).await?;
                    Ok(Invocation::Write(TxOutcome::from(&receipt)))
                }
            }
        }
        .await;
        finish("invoke_method", result)
    }

    /// `pending` until a receipt exists, then the receipt's status
    pub async fn check_tx_status(&self, hash: &str) -> GatewayResult<TxStatus> {
        let result: GatewayResult<TxStatus> = async {
            let hash = parse_tx_hash(hash)?;
            let node = self.connection.ensure_connected().await?;
            self.receipts.status(&node, hash).await
        }
        .await;
        finish("check_tx_status", result)
    }

    /// Probe the node, reconnecting once if needed
    pub async fn health_check(&self) -> bool {
        if self.connection.phase().await == ConnectionPhase::Unconfigured {
            return false;
        }
        let healthy = match self.connection.ensure_connected().await {
            Ok(node) => {
                debug!("Node {} is healthy", node.url());
                true
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                false
            }
        };
        metrics::record_health_check(healthy);
        healthy
    }

    /// Read-only `eth_call`, using the session address as sender when set
    async fn call(&self, node: &LiveNode<C>, to: Address, data: Bytes) -> GatewayResult<Bytes> {
        let mut tx = TransactionRequest::new().to(to).data(data);
        if let Some(from) = self.accounts.current_address().await {
            tx = tx.from(from);
        }
        let tx = TypedTransaction::Legacy(tx);
        node.request("contract call", node.provider().call(&tx, None))
            .await
    }

    /// Build, sign and broadcast under the submission lock, then wait for the receipt
    async fn submit(&self, intent: TxIntent, budget: Duration) -> GatewayResult<TransactionReceipt> {
        let account = self.accounts.require().await?;
        let node = self.connection.ensure_connected().await?;

        let hash = {
            let _guard = self.submit_lock.lock().await;
            let unsigned = self.builder.build(&node, Some(&account), intent).await?;
            let signed = TransactionSender::sign(&unsigned, &account)?;
            self.sender.broadcast(&node, &signed).await?
        };

        let receipt = self.receipts.await_receipt(&node, hash, budget).await?;
        metrics::record_tx_confirmed(receipt.status == ReceiptStatus::Success);
        Ok(receipt)
    }
}

fn finish<T>(operation: &str, result: GatewayResult<T>) -> GatewayResult<T> {
    match &result {
        Ok(_) => {
            metrics::record_operation(operation, Ok(()));
            debug!("{} succeeded", operation);
        }
        Err(e) => {
            metrics::record_operation(operation, Err(e.kind()));
            warn!("{} failed: {}", operation, e);
        }
    }
    result
}

/// Ether decimal string to wei
fn parse_amount(raw: &str) -> GatewayResult<U256> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(GatewayError::Validation(format!(
            "Invalid amount: {:?}",
            raw
        )));
    }
    parse_ether(trimmed)
        .map_err(|e| GatewayError::Validation(format!("Invalid amount {:?}: {}", raw, e)))
}

fn parse_tx_hash(raw: &str) -> GatewayResult<H256> {
    let digits = codec::strip_hex_prefix(raw.trim());
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GatewayError::Validation(format!(
            "Invalid transaction hash: {}",
            raw
        )));
    }
    digits
        .parse::<H256>()
        .map_err(|e| GatewayError::Validation(format!("Invalid transaction hash {}: {}", raw, e)))
}

fn gas_units(gas: U256) -> GatewayResult<u64> {
    if gas > U256::from(u64::MAX) {
        return Err(GatewayError::Internal(format!(
            "Gas estimate {} does not fit in 64 bits",
            gas
        )));
    }
    Ok(gas.as_u64())
}

/// Amounts may arrive as JSON numbers or strings
fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a decimal amount, got {}",
            other
        ))),
    }
}

fn optional_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a decimal amount, got {}",
            other
        ))),
    }
}
