//! Receipt polling for broadcast transactions
//!
//! A missing receipt means pending-or-unknown, never failure. Running out of
//! time is reported as a timeout so callers can re-poll instead of resubmitting.

use super::connection::LiveNode;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::{Address, TransactionReceipt as NodeReceipt, H256};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// Confirmed outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReceipt {
    pub hash: H256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
}

impl From<NodeReceipt> for TransactionReceipt {
    fn from(receipt: NodeReceipt) -> Self {
        // Pre-Byzantium receipts carry no status; treat them as success
        let status = match receipt.status {
            Some(code) if code.is_zero() => ReceiptStatus::Failure,
            _ => ReceiptStatus::Success,
        };
        Self {
            hash: receipt.transaction_hash,
            status,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            contract_address: receipt.contract_address,
        }
    }
}

/// Status reported for an arbitrary transaction hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failure,
}

impl From<ReceiptStatus> for TxStatus {
    fn from(status: ReceiptStatus) -> Self {
        match status {
            ReceiptStatus::Success => TxStatus::Success,
            ReceiptStatus::Failure => TxStatus::Failure,
        }
    }
}

/// Polls the node until a receipt shows up or the budget runs out
#[derive(Debug, Clone)]
pub struct ReceiptWaiter {
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Fetch the receipt once
    pub async fn fetch<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        hash: H256,
    ) -> GatewayResult<Option<TransactionReceipt>> {
        let receipt = node
            .request("receipt lookup", node.provider().get_transaction_receipt(hash))
            .await?;
        Ok(receipt.map(TransactionReceipt::from))
    }

    /// Current status of a transaction hash
    pub async fn status<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        hash: H256,
    ) -> GatewayResult<TxStatus> {
        Ok(match self.fetch(node, hash).await? {
            Some(receipt) => receipt.status.into(),
            None => TxStatus::Pending,
        })
    }

    /// Wait for a transaction to be mined
    pub async fn await_receipt<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        hash: H256,
        budget: Duration,
    ) -> GatewayResult<TransactionReceipt> {
        let started = Instant::now();

        let polled = timeout(budget, async {
            loop {
                match self.fetch(node, hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => debug!("Transaction {:?} not mined yet", hash),
                    // Connection hiccups while waiting are not fatal
                    Err(e) if e.is_retryable() => {
                        warn!("Receipt poll for {:?} failed, retrying: {}", hash, e)
                    }
                    Err(e) => return Err(e),
                }
                sleep(self.poll_interval).await;
            }
        })
        .await;

        match polled {
            Ok(Ok(receipt)) => {
                let elapsed = started.elapsed();
                metrics::record_receipt_latency(elapsed.as_secs_f64());
                info!(
                    "Transaction {:?} mined in block {:?} ({:?}) after {:.1}s",
                    hash,
                    receipt.block_number,
                    receipt.status,
                    elapsed.as_secs_f64()
                );
                Ok(receipt)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                metrics::record_receipt_timeout();
                warn!(
                    "No receipt for {:?} within {:?}; it may still be mined",
                    hash, budget
                );
                Err(GatewayError::timeout(
                    "transaction receipt",
                    Some(format!("{:?}", hash)),
                ))
            }
        }
    }
}
