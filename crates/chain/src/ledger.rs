//! Ledger collaborator: typed reads, log queries and writes against the
//! financial contract.
//!
//! The [`Ledger`] trait is the seam between the decision engines and the
//! chain. [`crate::EmpLedger`] implements it over alloy; tests implement it
//! in memory.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::fmt::{self, Debug};

/// Errors returned by a [`Ledger`].
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("rpc call {method} failed: {reason}")]
    Rpc { method: &'static str, reason: String },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("invalid ledger configuration: {0}")]
    Config(String),
}

impl LedgerError {
    /// Wrap any displayable transport/contract error for `method`.
    pub fn rpc(method: &'static str, err: impl fmt::Display) -> Self {
        Self::Rpc {
            method,
            reason: err.to_string(),
        }
    }
}

/// Raw sponsor position as stored by the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionData {
    /// Outstanding synthetic tokens
    pub tokens_outstanding: U256,
    /// Time a pending withdrawal becomes executable (0 when none)
    pub withdrawal_request_pass_timestamp: u64,
    /// Pending withdrawal amount
    pub withdrawal_request_amount: U256,
    /// Collateral before fee adjustment
    pub raw_collateral: U256,
    /// Time a pending position transfer becomes executable (0 when none)
    pub transfer_position_request_pass_timestamp: u64,
}

/// Lifecycle state of a liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiquidationState {
    Uninitialized,
    PreDispute,
    PendingDispute,
    DisputeSucceeded,
    DisputeFailed,
}

impl LiquidationState {
    /// Label describing the liquidation after a reward withdrawal left it in this state.
    pub fn withdrawal_label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Liquidation deleted; All rewards have been withdrawn",
            Self::PreDispute => "Liquidation expired and not disputed",
            Self::PendingDispute => "Dispute pending",
            Self::DisputeSucceeded => "Dispute succeeded",
            Self::DisputeFailed => "Dispute failed",
        }
    }

    /// Whether the liquidation has been disputed.
    pub fn is_disputed(&self) -> bool {
        matches!(
            self,
            Self::PendingDispute | Self::DisputeSucceeded | Self::DisputeFailed
        )
    }
}

impl TryFrom<u8> for LiquidationState {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Uninitialized),
            1 => Ok(Self::PreDispute),
            2 => Ok(Self::PendingDispute),
            3 => Ok(Self::DisputeSucceeded),
            4 => Ok(Self::DisputeFailed),
            other => Err(LedgerError::Decode {
                what: "liquidation state",
                reason: format!("unknown state {}", other),
            }),
        }
    }
}

impl fmt::Display for LiquidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::PreDispute => "PreDispute",
            Self::PendingDispute => "PendingDispute",
            Self::DisputeSucceeded => "DisputeSucceeded",
            Self::DisputeFailed => "DisputeFailed",
        };
        f.write_str(name)
    }
}

/// Raw liquidation record. Its identifier is its index in the sponsor's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationData {
    pub sponsor: Address,
    pub liquidator: Address,
    pub state: LiquidationState,
    pub liquidation_time: u64,
    pub tokens_outstanding: U256,
    pub locked_collateral: U256,
    pub liquidated_collateral: U256,
    pub raw_unit_collateral: U256,
    /// `Address::ZERO` until disputed
    pub disputer: Address,
    pub settlement_price: U256,
    pub final_fee: U256,
}

/// Decimals of the two tokens the contract deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDecimals {
    pub collateral: u8,
    pub synthetic: u8,
}

impl Default for TokenDecimals {
    fn default() -> Self {
        Self {
            collateral: 18,
            synthetic: 18,
        }
    }
}

/// Addresses of the two tokens the contract deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenAddresses {
    pub collateral: Address,
    pub synthetic: Address,
}

/// Event kinds that can be queried from the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewSponsor,
    LiquidationCreated,
    LiquidationDisputed,
    DisputeSettled,
    LiquidationWithdrawn,
}

/// Decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    NewSponsor {
        sponsor: Address,
    },
    LiquidationCreated {
        sponsor: Address,
        liquidator: Address,
        liquidation_id: U256,
        tokens_outstanding: U256,
        locked_collateral: U256,
        liquidated_collateral: U256,
        liquidation_time: u64,
    },
    LiquidationDisputed {
        sponsor: Address,
        liquidator: Address,
        disputer: Address,
        liquidation_id: U256,
        dispute_bond_amount: U256,
    },
    DisputeSettled {
        caller: Address,
        sponsor: Address,
        liquidator: Address,
        disputer: Address,
        liquidation_id: U256,
        dispute_succeeded: bool,
    },
    LiquidationWithdrawn {
        caller: Address,
        paid_to_liquidator: U256,
        paid_to_disputer: U256,
        paid_to_sponsor: U256,
        liquidation_status: LiquidationState,
        settlement_price: U256,
    },
}

impl ContractEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewSponsor { .. } => EventKind::NewSponsor,
            Self::LiquidationCreated { .. } => EventKind::LiquidationCreated,
            Self::LiquidationDisputed { .. } => EventKind::LiquidationDisputed,
            Self::DisputeSettled { .. } => EventKind::DisputeSettled,
            Self::LiquidationWithdrawn { .. } => EventKind::LiquidationWithdrawn,
        }
    }
}

/// A decoded event together with where it was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub block_number: u64,
    pub tx_hash: Option<B256>,
    pub event: ContractEvent,
}

/// State-changing contract calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateLiquidation {
        sponsor: Address,
        min_collateral_per_token: U256,
        max_collateral_per_token: U256,
        max_tokens_to_liquidate: U256,
        deadline: u64,
    },
    Dispute {
        liquidation_id: U256,
        sponsor: Address,
    },
    WithdrawLiquidation {
        liquidation_id: U256,
        sponsor: Address,
    },
}

impl ContractCall {
    /// Contract method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateLiquidation { .. } => "createLiquidation",
            Self::Dispute { .. } => "dispute",
            Self::WithdrawLiquidation { .. } => "withdrawLiquidation",
        }
    }
}

/// Gas parameters for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSettings {
    /// Gas price in wei
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// Confirmation receipt of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    /// Contract events emitted by the transaction, in log order
    pub events: Vec<ContractEvent>,
}

impl TxReceipt {
    /// First emitted event of `kind`, if any.
    pub fn event(&self, kind: EventKind) -> Option<&ContractEvent> {
        self.events.iter().find(|event| event.kind() == kind)
    }
}

/// Read/write access to the financial contract.
///
/// Implementations must serialize [`Ledger::send`] calls from the signing
/// account.
#[async_trait]
pub trait Ledger: Send + Sync + Debug {
    /// Signing account.
    fn account(&self) -> Address;

    async fn latest_block(&self) -> Result<u64, LedgerError>;

    /// The contract's own notion of the current time.
    async fn current_time(&self) -> Result<u64, LedgerError>;

    async fn collateral_requirement(&self) -> Result<U256, LedgerError>;

    async fn liquidation_liveness(&self) -> Result<u64, LedgerError>;

    async fn min_sponsor_tokens(&self) -> Result<U256, LedgerError>;

    async fn token_decimals(&self) -> Result<TokenDecimals, LedgerError>;

    async fn token_addresses(&self) -> Result<TokenAddresses, LedgerError>;

    /// Name of the price the contract settles against, e.g. `ETH/BTC`.
    async fn price_identifier(&self) -> Result<String, LedgerError>;

    async fn position(&self, sponsor: Address) -> Result<PositionData, LedgerError>;

    /// Net collateral of `sponsor` after fees.
    async fn collateral(&self, sponsor: Address) -> Result<U256, LedgerError>;

    async fn liquidations(&self, sponsor: Address) -> Result<Vec<LiquidationData>, LedgerError>;

    /// Events of `kind` emitted in `[from_block, to_block]`.
    async fn events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, LedgerError>;

    /// Execute `call` read-only from the signing account and return its first output.
    async fn simulate(&self, call: &ContractCall) -> Result<U256, LedgerError>;

    /// Submit `call` and wait for its receipt.
    async fn send(&self, call: &ContractCall, gas: GasSettings) -> Result<TxReceipt, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidation_state_from_u8() {
        assert_eq!(LiquidationState::try_from(0).unwrap(), LiquidationState::Uninitialized);
        assert_eq!(LiquidationState::try_from(4).unwrap(), LiquidationState::DisputeFailed);
        assert!(LiquidationState::try_from(5).is_err());
    }

    #[test]
    fn test_withdrawal_labels() {
        assert_eq!(
            LiquidationState::Uninitialized.withdrawal_label(),
            "Liquidation deleted; All rewards have been withdrawn"
        );
        assert_eq!(
            LiquidationState::PreDispute.withdrawal_label(),
            "Liquidation expired and not disputed"
        );
        assert_eq!(LiquidationState::DisputeSucceeded.withdrawal_label(), "Dispute succeeded");
    }

    #[test]
    fn test_is_disputed() {
        assert!(!LiquidationState::PreDispute.is_disputed());
        assert!(!LiquidationState::Uninitialized.is_disputed());
        assert!(LiquidationState::PendingDispute.is_disputed());
        assert!(LiquidationState::DisputeFailed.is_disputed());
    }

    #[test]
    fn test_receipt_event_lookup() {
        let receipt = TxReceipt {
            tx_hash: B256::ZERO,
            block_number: 10,
            gas_used: 21_000,
            events: vec![ContractEvent::NewSponsor {
                sponsor: Address::ZERO,
            }],
        };
        assert!(receipt.event(EventKind::NewSponsor).is_some());
        assert!(receipt.event(EventKind::LiquidationCreated).is_none());
    }
}
