//! Transaction submission shared by the liquidator and the disputer.

use alloy::primitives::U256;
use risk_agent_chain::{ContractCall, GasSettings, Ledger, LedgerError, TokenDecimals, TxReceipt};
use std::time::Instant;
use tracing::debug;

use crate::fixed_point::{pow10, FixedPoint, WAD_DECIMALS};

/// Emit a tracing event at a level chosen at runtime.
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: tracing::Level = $level;
        if level == tracing::Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == tracing::Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == tracing::Level::INFO {
            tracing::info!($($arg)+)
        } else if level == tracing::Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

/// Counts of what one engine pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSummary {
    /// Items that met the trigger
    pub candidates: usize,
    /// Transactions confirmed
    pub submitted: usize,
    /// Items dropped before submission (failed simulation, zero size)
    pub skipped: usize,
    /// Submissions that failed after a successful simulation
    pub failed: usize,
}

impl ActionSummary {
    pub fn is_empty(&self) -> bool {
        self.candidates == 0
    }

    /// Whether any transaction was sent, confirmed or not. A failed send may
    /// still have changed contract state.
    pub fn sent_any(&self) -> bool {
        self.submitted > 0 || self.failed > 0
    }
}

/// Result of [`simulate_and_send`].
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The read-only call reverted; nothing was sent
    Rejected(LedgerError),
    /// The simulation passed but the transaction failed
    Failed(LedgerError),
    Confirmed {
        receipt: TxReceipt,
        /// Return value of the simulated call
        simulated: U256,
        elapsed_ms: u64,
    },
}

/// Simulate `call` and send it only if the simulation succeeds.
pub(crate) async fn simulate_and_send(ledger: &dyn Ledger, call: &ContractCall, gas: GasSettings) -> Outcome {
    let simulated = match ledger.simulate(call).await {
        Ok(value) => value,
        Err(e) => return Outcome::Rejected(e),
    };
    debug!(
        at = "Execution",
        method = call.method(),
        gas_price = gas.gas_price,
        gas_limit = gas.gas_limit,
        "Simulation passed, sending transaction"
    );

    let started = Instant::now();
    match ledger.send(call, gas).await {
        Ok(receipt) => Outcome::Confirmed {
            receipt,
            simulated,
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
        Err(e) => Outcome::Failed(e),
    }
}

/// Collateral per token as the contract expects it: an 18-decimal ratio of
/// raw collateral units to raw synthetic units.
pub fn raw_collateral_per_token(price: &FixedPoint, decimals: TokenDecimals) -> U256 {
    let target = WAD_DECIMALS as i32 + decimals.collateral as i32 - decimals.synthetic as i32;
    if target >= 0 {
        return price.rescale(target.min(u8::MAX as i32) as u8).raw();
    }
    price.rescale(0).raw() / pow10((-target).min(u8::MAX as i32) as u8)
}
