//! EVM Gateway - account, transaction and contract operations against one node
//!
//! A [`Gateway`] session holds a node connection and at most one signing
//! account. Reads go straight to the node; writes are built, signed,
//! broadcast and confirmed against a receipt with a per-operation timeout.

pub mod account;
pub mod chain;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod tx;

pub use error::{ErrorKind, ErrorReport, GatewayError, GatewayResult};
pub use gateway::{
    Balance, DeployRequest, Deployment, EstimateRequest, Gateway, InvokeRequest, Invocation,
    Reply, TransferRequest, TxOutcome,
};
