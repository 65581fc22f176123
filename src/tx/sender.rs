//! Transaction signing and broadcast

use super::builder::UnsignedTransaction;
use crate::account::Account;
use crate::chain::LiveNode;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

use ethers::providers::{JsonRpcClient, Middleware};
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Raw signed transaction bytes and their hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }
}

/// Signs with the session account and submits raw transactions
#[derive(Debug, Clone)]
pub struct TransactionSender {
    broadcast_timeout: Duration,
}

impl TransactionSender {
    pub fn new(broadcast_timeout: Duration) -> Self {
        Self { broadcast_timeout }
    }

    /// Sign `unsigned` with `account`. Pure and deterministic (RFC 6979 nonces).
    pub fn sign(
        unsigned: &UnsignedTransaction,
        account: &Account,
    ) -> GatewayResult<SignedTransaction> {
        if unsigned.from != account.address() {
            return Err(GatewayError::Validation(format!(
                "Transaction sender {:?} does not match account {:?}",
                unsigned.from,
                account.address()
            )));
        }

        let tx = unsigned.to_typed();
        let wallet = account.wallet_for_chain(unsigned.chain_id);
        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| GatewayError::Validation(format!("Failed to sign transaction: {}", e)))?;

        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        debug!("Signed transaction {:?} ({} bytes)", hash, raw.len());

        Ok(SignedTransaction { raw, hash })
    }

    /// Submit signed bytes. Node rejections carry the node's message verbatim.
    pub async fn broadcast<C: JsonRpcClient>(
        &self,
        node: &LiveNode<C>,
        signed: &SignedTransaction,
    ) -> GatewayResult<H256> {
        let send = async {
            node.provider()
                .send_raw_transaction(signed.raw.clone())
                .await
                .map(|pending| pending.tx_hash())
        };

        match timeout(self.broadcast_timeout, send).await {
            Ok(Ok(tx_hash)) => {
                if tx_hash != signed.hash {
                    warn!(
                        "Node reported hash {:?} for locally computed {:?}",
                        tx_hash, signed.hash
                    );
                }
                metrics::record_tx_submitted(node.chain_id());
                info!("Transaction sent: {:?} on chain {}", tx_hash, node.chain_id());
                Ok(tx_hash)
            }
            Ok(Err(e)) => {
                warn!("Node rejected transaction {:?}: {}", signed.hash, e);
                metrics::record_tx_rejected(node.chain_id());
                Err(match GatewayError::from_provider(e) {
                    // A rejected broadcast is a node-side refusal, whatever its wording
                    GatewayError::ContractLogic { message } => GatewayError::Rpc { message },
                    other => other,
                })
            }
            Err(_) => {
                warn!(
                    "Transaction send timeout for {:?}; it may still reach the network",
                    signed.hash
                );
                Err(GatewayError::timeout(
                    "transaction broadcast",
                    Some(format!("{:?}", signed.hash)),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::KeyOrigin;
    use crate::tx::gas::GasPrice;
    use ethers::types::{Address, U256};

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn unsigned(account: &Account, fee: GasPrice) -> UnsignedTransaction {
        UnsignedTransaction {
            from: account.address(),
            to: Some(Address::repeat_byte(0x42)),
            value: U256::exp10(18),
            nonce: U256::from(3u64),
            gas_limit: U256::from(25_200u64),
            fee,
            chain_id: 31337,
            data: Bytes::new(),
        }
    }

    #[test]
    fn signing_is_deterministic() {
        let account = Account::from_private_key(DEV_KEY, KeyOrigin::Supplied).unwrap();
        for fee in [
            GasPrice::Legacy {
                gas_price: U256::from(1_000_000_000u64),
            },
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(3_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            },
        ] {
            let tx = unsigned(&account, fee);
            let first = TransactionSender::sign(&tx, &account).unwrap();
            let second = TransactionSender::sign(&tx, &account).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.hash(), H256::from(keccak256(first.raw())));
        }
    }

    #[test]
    fn different_nonce_changes_signature() {
        let account = Account::from_private_key(DEV_KEY, KeyOrigin::Supplied).unwrap();
        let fee = GasPrice::Legacy {
            gas_price: U256::from(1u64),
        };
        let tx = unsigned(&account, fee);
        let mut next = tx.clone();
        next.nonce = tx.nonce + U256::one();

        let a = TransactionSender::sign(&tx, &account).unwrap();
        let b = TransactionSender::sign(&next, &account).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn foreign_sender_is_rejected() {
        let account = Account::from_private_key(DEV_KEY, KeyOrigin::Supplied).unwrap();
        let mut tx = unsigned(
            &account,
            GasPrice::Legacy {
                gas_price: U256::one(),
            },
        );
        tx.from = Address::repeat_byte(0x99);
        assert!(matches!(
            TransactionSender::sign(&tx, &account),
            Err(GatewayError::Validation(_))
        ));
    }
}
