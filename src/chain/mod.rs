//! Chain module - node connectivity and receipt confirmation
//!
//! This module provides:
//! - A node connection with liveness probing and one-shot reconnect
//! - Receipt polling with per-operation timeouts

pub mod connection;
pub mod receipt;

pub use connection::{ConnectionPhase, Dialer, LiveNode, NodeConnection, NodeEndpoint, NodeStatus};
pub use receipt::{ReceiptStatus, ReceiptWaiter, TransactionReceipt, TxStatus};
