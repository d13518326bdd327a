//! Snapshot of a financial contract's positions and liquidations.
//!
//! [`ContractClient::refresh`] rebuilds the whole snapshot from the ledger and
//! swaps it in atomically; readers only ever see a complete snapshot. A failed
//! refresh leaves the previous snapshot in place.

use alloy::primitives::{Address, U256};
use futures::{StreamExt, TryStreamExt};
use parking_lot::{Mutex, RwLock};
use risk_agent_chain::{
    ContractEvent, EventKind, Ledger, LedgerError, LiquidationData, LiquidationState, TokenDecimals,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::fixed_point::{is_under_collateralized, FixedPoint, WAD_DECIMALS};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("ledger read failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// An open sponsor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub sponsor: Address,
    /// Outstanding synthetic tokens
    pub tokens_outstanding: FixedPoint,
    /// Zero when no withdrawal is pending
    pub withdrawal_request_pass_timestamp: u64,
    pub withdrawal_request_amount: FixedPoint,
    /// Net collateral posted
    pub amount_collateral: FixedPoint,
    pub has_pending_withdrawal: bool,
}

impl Position {
    /// Collateral left once the pending withdrawal executes.
    pub fn effective_collateral(&self) -> FixedPoint {
        self.amount_collateral
            .checked_sub(&self.withdrawal_request_amount)
            .unwrap_or_else(|| FixedPoint::zero(self.amount_collateral.decimals()))
    }
}

/// A liquidation that has not been fully withdrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liquidation {
    pub sponsor: Address,
    /// Index in the sponsor's liquidation list
    pub id: U256,
    pub liquidator: Address,
    pub disputer: Option<Address>,
    pub state: LiquidationState,
    pub liquidation_time: u64,
    pub tokens_outstanding: FixedPoint,
    pub locked_collateral: FixedPoint,
    pub liquidated_collateral: FixedPoint,
}

/// Contract state as of one refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sponsors: Vec<Address>,
    pub positions: Vec<Position>,
    /// Pre-dispute, liveness not elapsed
    pub undisputed_liquidations: Vec<Liquidation>,
    /// Pre-dispute, liveness elapsed
    pub expired_liquidations: Vec<Liquidation>,
    pub disputed_liquidations: Vec<Liquidation>,
    pub collateral_requirement: FixedPoint,
    pub liquidation_liveness: u64,
    pub min_sponsor_tokens: FixedPoint,
    /// Ledger time of the refresh; zero before the first refresh
    pub last_update_time: u64,
    pub decimals: TokenDecimals,
}

impl Default for Snapshot {
    fn default() -> Self {
        let decimals = TokenDecimals::default();
        Self {
            sponsors: Vec::new(),
            positions: Vec::new(),
            undisputed_liquidations: Vec::new(),
            expired_liquidations: Vec::new(),
            disputed_liquidations: Vec::new(),
            collateral_requirement: FixedPoint::zero(WAD_DECIMALS),
            liquidation_liveness: 0,
            min_sponsor_tokens: FixedPoint::zero(decimals.synthetic),
            last_update_time: 0,
            decimals,
        }
    }
}

/// Sponsor discovery state, committed only with a successful refresh.
#[derive(Debug, Clone, Default)]
struct SponsorCursor {
    next_block: u64,
    sponsors: Vec<Address>,
}

/// Polls the ledger and keeps the latest [`Snapshot`].
#[derive(Debug)]
pub struct ContractClient {
    ledger: Arc<dyn Ledger>,
    config: ClientConfig,
    snapshot: RwLock<Arc<Snapshot>>,
    cursor: Mutex<SponsorCursor>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ContractClient {
    pub fn new(ledger: Arc<dyn Ledger>, config: ClientConfig) -> Self {
        let cursor = SponsorCursor {
            next_block: config.start_block,
            sponsors: Vec::new(),
        };
        Self {
            ledger,
            config,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            cursor: Mutex::new(cursor),
            last_refresh: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Resynchronize from the ledger. Returns `false` when skipped because the
    /// last refresh is younger than the staleness threshold and `force` is off.
    #[instrument(skip(self))]
    pub async fn refresh(&self, force: bool) -> Result<bool, ClientError> {
        let _guard = self.refresh_lock.lock().await;
        let last_refresh = *self.last_refresh.lock();
        if let (false, Some(last)) = (force, last_refresh) {
            if last.elapsed() < self.config.staleness_threshold() {
                debug!(at = "ContractClient", "Refresh skipped, snapshot is fresh");
                return Ok(false);
            }
        }

        let started = Instant::now();
        let ledger = self.ledger.as_ref();
        let latest_block = ledger.latest_block().await?;

        let mut cursor = self.cursor.lock().clone();
        if cursor.next_block <= latest_block {
            let records = ledger
                .events(EventKind::NewSponsor, cursor.next_block, latest_block)
                .await?;
            let mut known: HashSet<Address> = cursor.sponsors.iter().copied().collect();
            for record in records {
                if let ContractEvent::NewSponsor { sponsor } = record.event {
                    if known.insert(sponsor) {
                        cursor.sponsors.push(sponsor);
                    }
                }
            }
            cursor.next_block = latest_block + 1;
        }

        let (current_time, requirement, liveness, min_sponsor_tokens, decimals) = tokio::try_join!(
            ledger.current_time(),
            ledger.collateral_requirement(),
            ledger.liquidation_liveness(),
            ledger.min_sponsor_tokens(),
            ledger.token_decimals(),
        )?;

        // `buffered` keeps sponsor order while capping in-flight reads
        let sponsor_data: Vec<_> = futures::stream::iter(cursor.sponsors.iter().map(|&sponsor| async move {
            let (position, collateral, liquidations) = tokio::try_join!(
                ledger.position(sponsor),
                ledger.collateral(sponsor),
                ledger.liquidations(sponsor),
            )?;
            Ok::<_, LedgerError>((sponsor, position, collateral, liquidations))
        }))
        .buffered(self.config.max_concurrent_reads.max(1))
        .try_collect()
        .await?;

        let mut snapshot = Snapshot {
            sponsors: cursor.sponsors.clone(),
            collateral_requirement: FixedPoint::from_wad(requirement),
            liquidation_liveness: liveness,
            min_sponsor_tokens: FixedPoint::from_raw(min_sponsor_tokens, decimals.synthetic),
            last_update_time: current_time,
            decimals,
            ..Snapshot::default()
        };

        for (sponsor, position, collateral, liquidations) in sponsor_data {
            if !position.raw_collateral.is_zero() {
                snapshot.positions.push(Position {
                    sponsor,
                    tokens_outstanding: FixedPoint::from_raw(position.tokens_outstanding, decimals.synthetic),
                    withdrawal_request_pass_timestamp: position.withdrawal_request_pass_timestamp,
                    withdrawal_request_amount: FixedPoint::from_raw(
                        position.withdrawal_request_amount,
                        decimals.collateral,
                    ),
                    amount_collateral: FixedPoint::from_raw(collateral, decimals.collateral),
                    has_pending_withdrawal: position.withdrawal_request_pass_timestamp > 0,
                });
            }

            for (index, data) in liquidations.into_iter().enumerate() {
                if data.state == LiquidationState::Uninitialized {
                    continue;
                }
                let liquidation = to_liquidation(U256::from(index), data, decimals);
                if liquidation.state != LiquidationState::PreDispute {
                    snapshot.disputed_liquidations.push(liquidation);
                } else if liquidation.liquidation_time.saturating_add(liveness) <= current_time {
                    snapshot.expired_liquidations.push(liquidation);
                } else {
                    snapshot.undisputed_liquidations.push(liquidation);
                }
            }
        }

        info!(
            at = "ContractClient",
            sponsors = snapshot.sponsors.len(),
            positions = snapshot.positions.len(),
            undisputed = snapshot.undisputed_liquidations.len(),
            expired = snapshot.expired_liquidations.len(),
            disputed = snapshot.disputed_liquidations.len(),
            ledger_time = current_time,
            latest_block,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Client state refreshed"
        );

        *self.snapshot.write() = Arc::new(snapshot);
        *self.cursor.lock() = cursor;
        *self.last_refresh.lock() = Some(Instant::now());
        Ok(true)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.snapshot().positions.clone()
    }

    /// Positions whose collateral, net of pending withdrawals, is below
    /// `tokens × price × requirement`.
    pub fn undercollateralized(&self, price: &FixedPoint) -> Vec<Position> {
        let snapshot = self.snapshot();
        snapshot
            .positions
            .iter()
            .filter(|position| {
                is_under_collateralized(
                    &position.tokens_outstanding,
                    &position.effective_collateral(),
                    price,
                    &snapshot.collateral_requirement,
                )
            })
            .cloned()
            .collect()
    }

    pub fn undisputed_liquidations(&self) -> Vec<Liquidation> {
        self.snapshot().undisputed_liquidations.clone()
    }

    pub fn expired_liquidations(&self) -> Vec<Liquidation> {
        self.snapshot().expired_liquidations.clone()
    }

    pub fn disputed_liquidations(&self) -> Vec<Liquidation> {
        self.snapshot().disputed_liquidations.clone()
    }

    /// Whether `liquidation` was collateralized at `price`, i.e. should not
    /// have been liquidated.
    pub fn is_disputable(&self, liquidation: &Liquidation, price: &FixedPoint) -> bool {
        let snapshot = self.snapshot();
        !is_under_collateralized(
            &liquidation.tokens_outstanding,
            &liquidation.liquidated_collateral,
            price,
            &snapshot.collateral_requirement,
        )
    }

    pub fn last_update_time(&self) -> u64 {
        self.snapshot().last_update_time
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }
}

fn to_liquidation(id: U256, data: LiquidationData, decimals: TokenDecimals) -> Liquidation {
    Liquidation {
        sponsor: data.sponsor,
        id,
        liquidator: data.liquidator,
        disputer: (data.disputer != Address::ZERO).then_some(data.disputer),
        state: data.state,
        liquidation_time: data.liquidation_time,
        tokens_outstanding: FixedPoint::from_raw(data.tokens_outstanding, decimals.synthetic),
        locked_collateral: FixedPoint::from_raw(data.locked_collateral, decimals.collateral),
        liquidated_collateral: FixedPoint::from_raw(data.liquidated_collateral, decimals.collateral),
    }
}
