//! Assembly of complete unsigned transactions

use super::gas::{FeeEstimator, GasPrice};
use crate::account::Account;
use crate::chain::LiveNode;
use crate::error::{GatewayError, GatewayResult};

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, U256,
};
use serde::Serialize;
use tracing::debug;

/// What the caller wants on chain, before nonce and fees are known
#[derive(Debug, Clone, Default)]
pub struct TxIntent {
    /// `None` deploys `data` as contract creation code
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    /// Flat gas added on top of the buffered estimate
    pub gas_headroom: u64,
}

impl TxIntent {
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            value,
            ..Default::default()
        }
    }

    pub fn call(to: Address, data: Bytes, value: U256) -> Self {
        Self {
            to: Some(to),
            value,
            data,
            gas_headroom: 0,
        }
    }

    pub fn deploy(code: Bytes, gas_headroom: u64) -> Self {
        Self {
            to: None,
            value: U256::zero(),
            data: code,
            gas_headroom,
        }
    }

    /// Fee-less request used for simulation
    fn draft(&self, from: Address) -> TypedTransaction {
        let mut request = TransactionRequest::new().from(from).value(self.value);
        if let Some(to) = self.to {
            request = request.to(to);
        }
        if !self.data.is_empty() {
            request = request.data(self.data.clone());
        }
        request.into()
    }
}

/// A fully populated transaction awaiting a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedTransaction {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub nonce: U256,
    pub gas_limit: U256,
    pub fee: GasPrice,
    pub chain_id: u64,
    pub data: Bytes,
}

impl UnsignedTransaction {
    /// Typed envelope matching the fee fields
    pub fn to_typed(&self) -> TypedTransaction {
        match self.fee {
            GasPrice::Legacy { gas_price } => {
                let mut request = TransactionRequest::new()
                    .from(self.from)
                    .value(self.value)
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .gas_price(gas_price)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    request = request.to(to);
                }
                if !self.data.is_empty() {
                    request = request.data(self.data.clone());
                }
                TypedTransaction::Legacy(request)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut request = Eip1559TransactionRequest::new()
                    .from(self.from)
                    .value(self.value)
                    .nonce(self.nonce)
                    .gas(self.gas_limit)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas)
                    .chain_id(self.chain_id);
                if let Some(to) = self.to {
                    request = request.to(to);
                }
                if !self.data.is_empty() {
                    request = request.data(self.data.clone());
                }
                TypedTransaction::Eip1559(request)
            }
        }
    }
}

/// Builds transactions from live chain data; nothing is cached between builds
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fees: FeeEstimator,
}

impl TransactionBuilder {
    pub fn new(fees: FeeEstimator) -> Self {
        Self { fees }
    }

    pub fn fees(&self) -> &FeeEstimator {
        &self.fees
    }

    /// Populate nonce, gas and chain id for `intent` sent from `account`
    pub async fn build<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        account: Option<&Account>,
        intent: TxIntent,
    ) -> GatewayResult<UnsignedTransaction> {
        let account = account.ok_or(GatewayError::NoAccount)?;
        let from = account.address();

        let nonce = self.fetch_nonce(node, from).await?;

        let estimate = self.fees.estimate_gas(node, &intent.draft(from)).await?;
        let gas_limit = self.fees.buffered_limit(estimate, intent.gas_headroom)?;
        let fee = self.fees.fee_quote(node).await?;
        let max_cost = FeeEstimator::calculate_cost(gas_limit, &fee)?;

        let tx = UnsignedTransaction {
            from,
            to: intent.to,
            value: intent.value,
            nonce,
            gas_limit,
            fee,
            chain_id: node.chain_id(),
            data: intent.data,
        };

        debug!(
            "Built transaction from {:?} nonce {} gas {} (max cost {} wei) on chain {}",
            tx.from, tx.nonce, tx.gas_limit, max_cost, tx.chain_id
        );
        Ok(tx)
    }

    /// Transaction count including transactions still in the node's pool
    async fn fetch_nonce<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        address: Address,
    ) -> GatewayResult<U256> {
        node.request(
            "nonce lookup",
            node.provider()
                .get_transaction_count(address, Some(BlockNumber::Pending.into())),
        )
        .await
    }
}
