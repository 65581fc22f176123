//! Gas estimation and fee quoting

use crate::chain::LiveNode;
use crate::config::{FeeConfig, FeeStrategy};
use crate::error::{GatewayError, GatewayResult};

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, U256};
use serde::Serialize;
use tracing::{debug, warn};

const GWEI: u64 = 1_000_000_000;

/// Fee fields of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GasPrice {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Highest price per gas unit the transaction may pay
    pub fn max_per_gas(&self) -> U256 {
        match self {
            GasPrice::Legacy { gas_price } => *gas_price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Asks the node for gas estimates and prices; never mutates chain state
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    config: FeeConfig,
}

impl FeeEstimator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Simulate the transaction and return the gas units it needs
    pub async fn estimate_gas<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        tx: &TypedTransaction,
    ) -> GatewayResult<U256> {
        let gas = node
            .request("gas estimate", node.provider().estimate_gas(tx, None))
            .await?;
        debug!("Gas estimate on chain {}: {}", node.chain_id(), gas);
        Ok(gas)
    }

    /// Node-reported gas price
    pub async fn current_gas_price<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
    ) -> GatewayResult<U256> {
        node.request("gas price", node.provider().get_gas_price())
            .await
    }

    /// Fee fields for a new transaction, per the configured strategy
    pub async fn fee_quote<C: JsonRpcClient>(&self, node: &LiveNode<C>) -> GatewayResult<GasPrice> {
        let quote = match self.config.strategy {
            FeeStrategy::Legacy => self.legacy_quote(node).await?,
            FeeStrategy::Eip1559 => match self.estimate_eip1559_fees(node).await? {
                Some((max_fee_per_gas, max_priority_fee_per_gas)) => GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
                None => {
                    warn!(
                        "Chain {} reports no base fee, falling back to legacy pricing",
                        node.chain_id()
                    );
                    self.legacy_quote(node).await?
                }
            },
        };

        debug!("Fee quote for chain {}: {:?}", node.chain_id(), quote);
        Ok(quote)
    }

    async fn legacy_quote<C: JsonRpcClient>(&self, node: &LiveNode<C>) -> GatewayResult<GasPrice> {
        let price = self.current_gas_price(node).await?;
        let gas_price = price
            .checked_mul(U256::from(self.config.gas_price_buffer_percent) + U256::from(100u64))
            .map(|scaled| scaled / 100)
            .ok_or_else(|| overflow("gas price", price))?;
        Ok(GasPrice::Legacy { gas_price })
    }

    /// Estimate EIP-1559 fees from the latest block's base fee
    async fn estimate_eip1559_fees<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
    ) -> GatewayResult<Option<(U256, U256)>> {
        let block = node
            .request("latest block", node.provider().get_block(BlockNumber::Latest))
            .await?;

        let Some(base_fee) = block.and_then(|b| b.base_fee_per_gas) else {
            return Ok(None);
        };

        let priority_fee = U256::from(self.config.priority_fee_gwei) * U256::from(GWEI);

        // Max fee = 2 * base_fee + priority_fee, saturating since the cap applies next
        let max_fee = base_fee.saturating_mul(U256::from(2)).saturating_add(priority_fee);

        // Cap at configured max, but never below the priority fee
        let cap = U256::from(self.config.max_fee_per_gas_gwei) * U256::from(GWEI);
        let max_fee = std::cmp::max(std::cmp::min(max_fee, cap), priority_fee);

        Ok(Some((max_fee, priority_fee)))
    }

    /// Gas limit with the configured percentage buffer plus flat headroom
    pub fn buffered_limit(&self, estimate: U256, headroom: u64) -> GatewayResult<U256> {
        estimate
            .checked_mul(U256::from(self.config.gas_limit_buffer_percent) + U256::from(100u64))
            .map(|scaled| scaled / 100)
            .and_then(|buffered| buffered.checked_add(U256::from(headroom)))
            .ok_or_else(|| overflow("gas estimate", estimate))
    }

    /// Worst-case cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> GatewayResult<U256> {
        gas_limit
            .checked_mul(gas_price.max_per_gas())
            .ok_or_else(|| overflow("fee", gas_price.max_per_gas()))
    }
}

fn overflow(what: &str, value: U256) -> GatewayError {
    GatewayError::Rpc {
        message: format!("Node-reported {} {} is out of range", what, value),
    }
}
