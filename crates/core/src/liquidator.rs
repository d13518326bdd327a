//! Liquidation engine.
//!
//! Each pass refreshes the contract snapshot, the price feed and the gas
//! price, then liquidates every position that is under-collateralized at
//! `price × (1 - cr_threshold)`. Candidates are handled one at a time and a
//! failure on one never stops the others.

use alloy::primitives::U256;
use anyhow::{Context, Result};
use risk_agent_chain::{ContractCall, ContractEvent, EventKind, GasEstimator, GasSettings, Ledger};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ContractClient, Position};
use crate::config::LiquidatorConfig;
use crate::execution::{raw_collateral_per_token, simulate_and_send, ActionSummary, Outcome};
use crate::fixed_point::{FixedPoint, WAD_DECIMALS};
use crate::price_feed::PriceFeed;

/// Contract parameters that never change, read on first use.
#[derive(Debug, Clone, Copy)]
struct ContractParams {
    collateral_requirement: FixedPoint,
    /// Raw synthetic units
    min_sponsor_tokens: U256,
}

/// Tokens to liquidate from a position with `outstanding` tokens.
///
/// Without a cap the whole position is taken. A cap that would leave fewer
/// than `min_sponsor_tokens` behind is lowered so exactly the minimum remains.
/// Zero means the position cannot be liquidated within the cap.
pub fn liquidation_amount(outstanding: U256, min_sponsor_tokens: U256, max_tokens: Option<U256>) -> U256 {
    match max_tokens {
        None => outstanding,
        Some(max) if max >= outstanding => outstanding,
        Some(max) if outstanding - max >= min_sponsor_tokens => max,
        Some(_) => outstanding.saturating_sub(min_sponsor_tokens),
    }
}

/// Liquidates under-collateralized positions and withdraws liquidation rewards.
#[derive(Debug)]
pub struct Liquidator {
    client: Arc<ContractClient>,
    price_feed: Arc<PriceFeed>,
    gas: Arc<dyn GasEstimator>,
    config: LiquidatorConfig,
    /// `1 - cr_threshold`
    price_scale: FixedPoint,
    min_collateral_per_token: FixedPoint,
    params: OnceCell<ContractParams>,
}

impl Liquidator {
    pub fn new(
        client: Arc<ContractClient>,
        price_feed: Arc<PriceFeed>,
        gas: Arc<dyn GasEstimator>,
        config: LiquidatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let cr_threshold = FixedPoint::from_f64(config.cr_threshold, WAD_DECIMALS)?;
        let price_scale = cr_threshold
            .one_minus()
            .context("cr_threshold must be below 1")?;
        let min_collateral_per_token = FixedPoint::from_f64(config.liquidation_min_price, WAD_DECIMALS)?;
        Ok(Self {
            client,
            price_feed,
            gas,
            config,
            price_scale,
            min_collateral_per_token,
            params: OnceCell::new(),
        })
    }

    fn ledger(&self) -> &dyn Ledger {
        self.client.ledger().as_ref()
    }

    async fn params(&self) -> Result<ContractParams> {
        let params = self
            .params
            .get_or_try_init(|| async {
                let ledger = self.ledger();
                let (requirement, min_sponsor_tokens) =
                    tokio::try_join!(ledger.collateral_requirement(), ledger.min_sponsor_tokens())?;
                Ok::<_, anyhow::Error>(ContractParams {
                    collateral_requirement: FixedPoint::from_wad(requirement),
                    min_sponsor_tokens,
                })
            })
            .await?;
        Ok(*params)
    }

    /// Refresh the snapshot, price feed and gas price. The snapshot refresh
    /// is skipped when it is still fresh.
    async fn update(&self) -> Result<()> {
        let (client, feed, ()) = tokio::join!(
            self.client.refresh(false),
            self.price_feed.update(),
            self.gas.update()
        );
        client?;
        if let Err(e) = feed {
            warn!(at = "Liquidator", error = %e, "Price feed update failed");
        }
        Ok(())
    }

    fn gas_settings(&self) -> GasSettings {
        GasSettings {
            gas_price: self.gas.fast_price(),
            gas_limit: self.config.txn_gas_limit,
        }
    }

    /// Liquidate at the feed's current price. Does nothing when the feed has
    /// no price.
    #[instrument(skip(self))]
    pub async fn query_and_liquidate(&self, max_tokens: Option<U256>) -> Result<ActionSummary> {
        self.update().await?;
        let Some(price) = self.price_feed.current_price() else {
            warn!(
                at = "Liquidator",
                feed = self.price_feed.name(),
                "Cannot liquidate: price feed returned no price"
            );
            return Ok(ActionSummary::default());
        };
        self.liquidate_positions(price, max_tokens).await
    }

    /// Liquidate at `price` instead of the feed's price.
    #[instrument(skip(self), fields(price = %price))]
    pub async fn query_and_liquidate_at(&self, price: FixedPoint, max_tokens: Option<U256>) -> Result<ActionSummary> {
        self.update().await?;
        self.liquidate_positions(price, max_tokens).await
    }

    async fn liquidate_positions(&self, price: FixedPoint, max_tokens: Option<U256>) -> Result<ActionSummary> {
        let params = self.params().await?;
        let snapshot = self.client.snapshot();

        let scaled_price = price.mul(&self.price_scale);
        let max_collateral_per_token = scaled_price.mul(&params.collateral_requirement);
        let max_raw = raw_collateral_per_token(&max_collateral_per_token, snapshot.decimals);
        let min_raw = raw_collateral_per_token(&self.min_collateral_per_token, snapshot.decimals);

        let candidates = self.client.undercollateralized(&scaled_price);
        let mut summary = ActionSummary {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            debug!(
                at = "Liquidator",
                input_price = %price,
                scaled_price = %scaled_price,
                "No undercollateralized position"
            );
            return Ok(summary);
        }

        for position in &candidates {
            let outstanding = position.tokens_outstanding.raw();
            let amount = liquidation_amount(outstanding, params.min_sponsor_tokens, max_tokens);
            if amount.is_zero() {
                error!(
                    at = "Liquidator",
                    sponsor = %position.sponsor,
                    tokens_outstanding = %position.tokens_outstanding,
                    max_tokens = ?max_tokens,
                    "Refusing to liquidate 0 tokens: position is at the minimum sponsor size"
                );
                summary.skipped += 1;
                continue;
            }
            if amount < outstanding {
                warn!(
                    at = "Liquidator",
                    sponsor = %position.sponsor,
                    tokens_to_liquidate = %amount,
                    tokens_outstanding = %outstanding,
                    "Submitting a partial liquidation"
                );
            }

            let call = ContractCall::CreateLiquidation {
                sponsor: position.sponsor,
                min_collateral_per_token: min_raw,
                max_collateral_per_token: max_raw,
                max_tokens_to_liquidate: amount,
                deadline: snapshot
                    .last_update_time
                    .saturating_add(self.config.liquidation_deadline_secs),
            };
            self.submit(position, &call, &scaled_price, &mut summary).await;
        }

        // Reward withdrawal must see the new liquidations
        if summary.sent_any() {
            if let Err(e) = self.client.refresh(true).await {
                warn!(at = "Liquidator", error = %e, "Post-liquidation refresh failed");
            }
        }
        Ok(summary)
    }

    async fn submit(&self, position: &Position, call: &ContractCall, scaled_price: &FixedPoint, summary: &mut ActionSummary) {
        match simulate_and_send(self.ledger(), call, self.gas_settings()).await {
            Outcome::Rejected(e) => {
                info!(
                    at = "Liquidator",
                    sponsor = %position.sponsor,
                    error = %e,
                    "Cannot liquidate position: not enough synthetic (or large enough approval) to initiate liquidation"
                );
                summary.skipped += 1;
            }
            Outcome::Failed(e) => {
                error!(
                    at = "Liquidator",
                    sponsor = %position.sponsor,
                    error = %e,
                    "Failed to liquidate position"
                );
                summary.failed += 1;
            }
            Outcome::Confirmed { receipt, elapsed_ms, .. } => {
                let level = self
                    .config
                    .log_overrides
                    .position_liquidated
                    .map_or(tracing::Level::INFO, |l| l.level());
                match receipt.event(EventKind::LiquidationCreated) {
                    Some(ContractEvent::LiquidationCreated {
                        liquidator,
                        liquidation_id,
                        tokens_outstanding,
                        locked_collateral,
                        liquidated_collateral,
                        ..
                    }) => crate::log_at!(
                        level,
                        at = "Liquidator",
                        tx = %receipt.tx_hash,
                        sponsor = %position.sponsor,
                        liquidator = %liquidator,
                        liquidation_id = %liquidation_id,
                        tokens_outstanding = %tokens_outstanding,
                        locked_collateral = %locked_collateral,
                        liquidated_collateral = %liquidated_collateral,
                        input_price = %scaled_price,
                        elapsed_ms,
                        "Position has been liquidated"
                    ),
                    _ => crate::log_at!(
                        level,
                        at = "Liquidator",
                        tx = %receipt.tx_hash,
                        sponsor = %position.sponsor,
                        input_price = %scaled_price,
                        elapsed_ms,
                        "Position has been liquidated"
                    ),
                }
                summary.submitted += 1;
            }
        }
    }

    /// Withdraw rewards from expired or disputed liquidations created by this
    /// account.
    #[instrument(skip(self))]
    pub async fn query_and_withdraw_rewards(&self) -> Result<ActionSummary> {
        let (client, ()) = tokio::join!(self.client.refresh(false), self.gas.update());
        client?;

        let account = self.ledger().account();
        let snapshot = self.client.snapshot();
        let withdrawable: Vec<_> = snapshot
            .expired_liquidations
            .iter()
            .chain(&snapshot.disputed_liquidations)
            .filter(|liquidation| liquidation.liquidator == account)
            .collect();

        let mut summary = ActionSummary {
            candidates: withdrawable.len(),
            ..Default::default()
        };
        if withdrawable.is_empty() {
            debug!(at = "Liquidator", "No withdrawable liquidations");
            return Ok(summary);
        }

        for liquidation in withdrawable {
            let call = ContractCall::WithdrawLiquidation {
                liquidation_id: liquidation.id,
                sponsor: liquidation.sponsor,
            };
            match simulate_and_send(self.ledger(), &call, self.gas_settings()).await {
                Outcome::Rejected(e) => {
                    debug!(
                        at = "Liquidator",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        state = %liquidation.state,
                        error = %e,
                        "No rewards to withdraw yet"
                    );
                    summary.skipped += 1;
                }
                Outcome::Failed(e) => {
                    error!(
                        at = "Liquidator",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        error = %e,
                        "Failed to withdraw liquidation rewards"
                    );
                    summary.failed += 1;
                }
                Outcome::Confirmed { receipt, simulated, .. } => {
                    let level = self
                        .config
                        .log_overrides
                        .liquidation_withdrawn
                        .map_or(tracing::Level::INFO, |l| l.level());
                    let (paid, status) = match receipt.event(EventKind::LiquidationWithdrawn) {
                        Some(ContractEvent::LiquidationWithdrawn {
                            paid_to_liquidator,
                            liquidation_status,
                            ..
                        }) => (*paid_to_liquidator, liquidation_status.withdrawal_label()),
                        _ => (simulated, "unknown"),
                    };
                    crate::log_at!(
                        level,
                        at = "Liquidator",
                        tx = %receipt.tx_hash,
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        amount_withdrawn = %paid,
                        liquidation_status = status,
                        "Liquidation withdrawn"
                    );
                    summary.submitted += 1;
                }
            }
        }

        if summary.sent_any() {
            if let Err(e) = self.client.refresh(true).await {
                warn!(at = "Liquidator", error = %e, "Post-withdrawal refresh failed");
            }
        }
        Ok(summary)
    }
}
