//! Error types for the EVM gateway

use ethers::providers::{ProviderError, RpcError};
use serde::Serialize;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No account configured; set a private key before sending transactions")]
    NoAccount,

    #[error("Method '{method}' not found in contract ABI")]
    MethodNotFound { method: String },

    #[error("RPC error: {message}")]
    Rpc { message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout {
        operation: String,
        tx_hash: Option<String>,
    },

    #[error("Contract logic error: {message}")]
    ContractLogic { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable tag for each error variant, exposed at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Validation,
    NoAccount,
    MethodNotFound,
    Rpc,
    Timeout,
    ContractLogic,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Validation => "validation",
            ErrorKind::NoAccount => "no_account",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::Rpc => "rpc",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ContractLogic => "contract_logic",
            ErrorKind::Internal => "internal",
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection(_) => ErrorKind::Connection,
            GatewayError::Validation(_) => ErrorKind::Validation,
            GatewayError::NoAccount => ErrorKind::NoAccount,
            GatewayError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            GatewayError::Rpc { .. } => ErrorKind::Rpc,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::ContractLogic { .. } => ErrorKind::ContractLogic,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if the caller should re-poll or retry instead of resubmitting
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_) | GatewayError::Timeout { .. }
        )
    }

    /// Classify a node-side failure.
    ///
    /// JSON-RPC error responses keep the node's message verbatim; anything
    /// that never produced a response is a connection problem.
    pub fn from_provider(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            let message = response.message.clone();
            if is_revert(&message) {
                return GatewayError::ContractLogic { message };
            }
            return GatewayError::Rpc { message };
        }

        match err {
            ProviderError::CustomError(message) if is_revert(&message) => {
                GatewayError::ContractLogic { message }
            }
            ProviderError::CustomError(message) => GatewayError::Rpc { message },
            other => GatewayError::Connection(other.to_string()),
        }
    }

    pub fn timeout(operation: impl Into<String>, tx_hash: Option<String>) -> Self {
        GatewayError::Timeout {
            operation: operation.into(),
            tx_hash,
        }
    }
}

fn is_revert(message: &str) -> bool {
    message.to_ascii_lowercase().contains("revert")
}

/// Serializable error payload handed to whatever sits in front of the gateway
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl From<&GatewayError> for ErrorReport {
    fn from(err: &GatewayError) -> Self {
        let tx_hash = match err {
            GatewayError::Timeout { tx_hash, .. } => tx_hash.clone(),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            tx_hash,
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
