//! Risk agent chain interaction layer.
//!
//! This crate provides:
//! - The [`Ledger`] collaborator trait and its raw contract types
//! - An alloy implementation for the expiring multi-party contract
//! - AMM pair reserve history from `Sync` logs
//! - Gas price estimation for submissions

pub mod bindings;
mod emp;
mod gas;
mod ledger;
mod pair;

pub use emp::EmpLedger;
pub use gas::{GasEstimator, RpcGasEstimator, DEFAULT_GAS_PRICE};
pub use ledger::{
    ContractCall, ContractEvent, EventKind, EventRecord, GasSettings, Ledger, LedgerError,
    LiquidationData, LiquidationState, PositionData, TokenAddresses, TokenDecimals, TxReceipt,
};
pub use pair::{uniswap_v2_pair, ReserveSample, ReserveSource, UniswapPairSource};
