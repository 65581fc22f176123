//! Transaction pipeline: fee estimation, assembly, signing and broadcast

mod builder;
mod gas;
mod sender;

pub use builder::{TransactionBuilder, TxIntent, UnsignedTransaction};
pub use gas::{FeeEstimator, GasPrice};
pub use sender::{SignedTransaction, TransactionSender};
