//! Dispute engine.
//!
//! Re-values each undisputed liquidation at the historical price for its
//! liquidation time and disputes the ones that were collateralized. Also
//! withdraws rewards from disputes this account raised.

use anyhow::Result;
use risk_agent_chain::{ContractCall, ContractEvent, EventKind, GasEstimator, GasSettings, Ledger};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ContractClient, Liquidation};
use crate::config::DisputerConfig;
use crate::execution::{simulate_and_send, ActionSummary, Outcome};
use crate::fixed_point::FixedPoint;
use crate::price_feed::PriceFeed;

/// Disputes liquidations that should not have happened.
#[derive(Debug)]
pub struct Disputer {
    client: Arc<ContractClient>,
    price_feed: Arc<PriceFeed>,
    gas: Arc<dyn GasEstimator>,
    config: DisputerConfig,
}

impl Disputer {
    pub fn new(
        client: Arc<ContractClient>,
        price_feed: Arc<PriceFeed>,
        gas: Arc<dyn GasEstimator>,
        config: DisputerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            price_feed,
            gas,
            config,
        })
    }

    fn ledger(&self) -> &dyn Ledger {
        self.client.ledger().as_ref()
    }

    fn gas_settings(&self) -> GasSettings {
        GasSettings {
            gas_price: self.gas.fast_price(),
            gas_limit: self.config.txn_gas_limit,
        }
    }

    async fn update(&self) -> Result<()> {
        let (client, feed, ()) = tokio::join!(
            self.client.refresh(false),
            self.price_feed.update(),
            self.gas.update()
        );
        client?;
        if let Err(e) = feed {
            warn!(at = "Disputer", error = %e, "Price feed update failed");
        }
        Ok(())
    }

    /// Dispute at the feed's historical price for each liquidation time, or
    /// at `override_price` for every liquidation when given.
    #[instrument(skip(self))]
    pub async fn query_and_dispute(&self, override_price: Option<FixedPoint>) -> Result<ActionSummary> {
        self.update().await?;
        let feed = &self.price_feed;
        let earliest_time = feed
            .last_update_time()
            .map(|last| last.saturating_sub(feed.lookback()));

        self.dispute_liquidations(|liquidation| {
            if let Some(price) = override_price {
                return Some(price);
            }
            if let Some(earliest) = earliest_time.filter(|&t| liquidation.liquidation_time < t) {
                warn!(
                    at = "Disputer",
                    sponsor = %liquidation.sponsor,
                    liquidation_id = %liquidation.id,
                    liquidation_time = liquidation.liquidation_time,
                    earliest_feed_time = earliest,
                    "Cannot dispute: liquidation time before earliest price feed time"
                );
                return None;
            }
            feed.historical_price(liquidation.liquidation_time)
        })
        .await
    }

    /// Dispute using a caller-supplied price for each liquidation. A `None`
    /// price skips that liquidation.
    pub async fn query_and_dispute_with<F>(&self, price_at: F) -> Result<ActionSummary>
    where
        F: Fn(&Liquidation) -> Option<FixedPoint>,
    {
        self.update().await?;
        self.dispute_liquidations(price_at).await
    }

    async fn dispute_liquidations<F>(&self, price_at: F) -> Result<ActionSummary>
    where
        F: Fn(&Liquidation) -> Option<FixedPoint>,
    {
        let snapshot = self.client.snapshot();
        let mut summary = ActionSummary::default();

        for liquidation in &snapshot.undisputed_liquidations {
            let Some(price) = price_at(liquidation) else {
                debug!(
                    at = "Disputer",
                    sponsor = %liquidation.sponsor,
                    liquidation_id = %liquidation.id,
                    liquidation_time = liquidation.liquidation_time,
                    "No price for liquidation time"
                );
                continue;
            };
            let ready = snapshot.last_update_time
                >= liquidation.liquidation_time.saturating_add(self.config.dispute_delay_secs);
            if !ready || !self.client.is_disputable(liquidation, &price) {
                debug!(
                    at = "Disputer",
                    sponsor = %liquidation.sponsor,
                    liquidation_id = %liquidation.id,
                    price = %price,
                    ready,
                    "Liquidation not disputable"
                );
                continue;
            }

            summary.candidates += 1;
            let call = ContractCall::Dispute {
                liquidation_id: liquidation.id,
                sponsor: liquidation.sponsor,
            };
            match simulate_and_send(self.ledger(), &call, self.gas_settings()).await {
                Outcome::Rejected(e) => {
                    info!(
                        at = "Disputer",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        error = %e,
                        "Cannot dispute liquidation: not enough collateral (or large enough approval) to initiate dispute"
                    );
                    summary.skipped += 1;
                }
                Outcome::Failed(e) => {
                    error!(
                        at = "Disputer",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        error = %e,
                        "Failed to dispute liquidation"
                    );
                    summary.failed += 1;
                }
                Outcome::Confirmed { receipt, elapsed_ms, .. } => {
                    let level = self
                        .config
                        .log_overrides
                        .liquidation_disputed
                        .map_or(tracing::Level::INFO, |l| l.level());
                    let bond = match receipt.event(EventKind::LiquidationDisputed) {
                        Some(ContractEvent::LiquidationDisputed {
                            dispute_bond_amount, ..
                        }) => dispute_bond_amount.to_string(),
                        _ => "unknown".to_string(),
                    };
                    crate::log_at!(
                        level,
                        at = "Disputer",
                        tx = %receipt.tx_hash,
                        sponsor = %liquidation.sponsor,
                        liquidator = %liquidation.liquidator,
                        liquidation_id = %liquidation.id,
                        liquidation_time = liquidation.liquidation_time,
                        dispute_price = %price,
                        dispute_bond = %bond,
                        elapsed_ms,
                        "Liquidation has been disputed"
                    );
                    summary.submitted += 1;
                }
            }
        }

        if summary.sent_any() {
            if let Err(e) = self.client.refresh(true).await {
                warn!(at = "Disputer", error = %e, "Post-dispute refresh failed");
            }
        }
        Ok(summary)
    }

    /// Withdraw rewards from settled disputes raised by this account.
    #[instrument(skip(self))]
    pub async fn query_and_withdraw_rewards(&self) -> Result<ActionSummary> {
        let (client, ()) = tokio::join!(self.client.refresh(false), self.gas.update());
        client?;

        let account = self.ledger().account();
        let snapshot = self.client.snapshot();
        let mut summary = ActionSummary::default();

        for liquidation in snapshot
            .disputed_liquidations
            .iter()
            .filter(|liquidation| liquidation.disputer == Some(account))
        {
            summary.candidates += 1;
            let call = ContractCall::WithdrawLiquidation {
                liquidation_id: liquidation.id,
                sponsor: liquidation.sponsor,
            };
            match simulate_and_send(self.ledger(), &call, self.gas_settings()).await {
                Outcome::Rejected(e) => {
                    debug!(
                        at = "Disputer",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        state = %liquidation.state,
                        error = %e,
                        "Dispute not yet settled"
                    );
                    summary.skipped += 1;
                }
                Outcome::Failed(e) => {
                    error!(
                        at = "Disputer",
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        error = %e,
                        "Failed to withdraw dispute rewards"
                    );
                    summary.failed += 1;
                }
                Outcome::Confirmed { receipt, simulated, .. } => {
                    let level = self
                        .config
                        .log_overrides
                        .dispute_withdrawn
                        .map_or(tracing::Level::INFO, |l| l.level());
                    let (paid, status) = match receipt.event(EventKind::LiquidationWithdrawn) {
                        Some(ContractEvent::LiquidationWithdrawn {
                            paid_to_disputer,
                            liquidation_status,
                            ..
                        }) => (*paid_to_disputer, liquidation_status.withdrawal_label()),
                        _ => (simulated, "unknown"),
                    };
                    crate::log_at!(
                        level,
                        at = "Disputer",
                        tx = %receipt.tx_hash,
                        sponsor = %liquidation.sponsor,
                        liquidation_id = %liquidation.id,
                        amount_withdrawn = %paid,
                        liquidation_status = status,
                        "Dispute rewards withdrawn"
                    );
                    summary.submitted += 1;
                }
            }
        }

        if summary.is_empty() {
            debug!(at = "Disputer", "No dispute rewards to withdraw");
        } else if summary.sent_any() {
            if let Err(e) = self.client.refresh(true).await {
                warn!(at = "Disputer", error = %e, "Post-withdrawal refresh failed");
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::test_support::{constant_price_feed, liquidation, FixedGas, MockLedger};
    use alloy::primitives::{Address, U256};
    use risk_agent_chain::LiquidationState;

    const ACCOUNT: Address = Address::repeat_byte(0xaa);
    const LIQUIDATOR: Address = Address::repeat_byte(0xbb);

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn fp(text: &str) -> FixedPoint {
        FixedPoint::parse(text, 18).unwrap()
    }

    fn disputer(ledger: &Arc<MockLedger>, price: Option<&str>) -> Disputer {
        let client = Arc::new(ContractClient::new(
            ledger.clone(),
            ClientConfig {
                staleness_threshold_secs: 0,
                ..Default::default()
            },
        ));
        Disputer::new(
            client,
            Arc::new(constant_price_feed(price)),
            Arc::new(FixedGas),
            DisputerConfig::default(),
        )
        .unwrap()
    }

    fn dispute_call(sponsor: Address) -> ContractCall {
        ContractCall::Dispute {
            liquidation_id: U256::ZERO,
            sponsor,
        }
    }

    #[tokio::test]
    async fn test_disputes_collateralized_liquidation() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        // 100 tokens, 125 collateral: collateralized at 1.0 (120 required)
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        let disputer = disputer(&ledger, Some("1"));

        let summary = disputer.query_and_dispute(None).await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(ledger.sent(), vec![dispute_call(addr(1))]);
    }

    #[tokio::test]
    async fn test_correct_liquidation_is_left_alone() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        // 132 required at 1.1
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        let disputer = disputer(&ledger, Some("1.1"));

        let summary = disputer.query_and_dispute(None).await.unwrap();
        assert!(summary.is_empty());
        assert!(ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_dispute_delay() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_990));
        let disputer = disputer(&ledger, Some("1"));

        assert!(disputer.query_and_dispute(None).await.unwrap().is_empty());

        ledger.state.lock().time = 10_050;
        let summary = disputer.query_and_dispute(None).await.unwrap();
        assert_eq!(summary.submitted, 1);
    }

    #[tokio::test]
    async fn test_liquidation_before_feed_lookback() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        // Feed updated at 10_000 with a 7200 second lookback
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 2_000));
        ledger.state.lock().liveness = 100_000;
        let disputer = disputer(&ledger, Some("1"));

        assert!(disputer.query_and_dispute(None).await.unwrap().is_empty());

        let summary = disputer.query_and_dispute(Some(fp("1"))).await.unwrap();
        assert_eq!(summary.submitted, 1);
    }

    #[tokio::test]
    async fn test_missing_price_skips_liquidation() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        let disputer = disputer(&ledger, None);

        assert!(disputer.query_and_dispute(None).await.unwrap().is_empty());
        assert!(ledger.state.lock().simulated.is_empty());
    }

    #[tokio::test]
    async fn test_price_function_per_liquidation() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        ledger.add_liquidation(liquidation(addr(2), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        let disputer = disputer(&ledger, None);

        let summary = disputer
            .query_and_dispute_with(|liquidation| {
                Some(if liquidation.sponsor == addr(1) { fp("1.1") } else { fp("0.9") })
            })
            .await
            .unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(ledger.sent(), vec![dispute_call(addr(2))]);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_skipped() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        ledger.add_liquidation(liquidation(addr(2), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        ledger.state.lock().fail_simulate_for.insert(addr(1));
        let disputer = disputer(&ledger, Some("1"));

        let summary = disputer.query_and_dispute(None).await.unwrap();
        assert_eq!(
            summary,
            ActionSummary {
                candidates: 2,
                submitted: 1,
                skipped: 1,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_withdraws_own_dispute_rewards() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        let mut ours = liquidation(addr(1), LIQUIDATOR, LiquidationState::DisputeSucceeded, 9_000);
        ours.disputer = ACCOUNT;
        let mut theirs = liquidation(addr(2), LIQUIDATOR, LiquidationState::DisputeSucceeded, 9_000);
        theirs.disputer = addr(0xcc);
        ledger.add_liquidation(ours);
        ledger.add_liquidation(theirs);
        let disputer = disputer(&ledger, Some("1"));

        let summary = disputer.query_and_withdraw_rewards().await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.submitted, 1);
        assert_eq!(
            ledger.sent(),
            vec![ContractCall::WithdrawLiquidation {
                liquidation_id: U256::ZERO,
                sponsor: addr(1),
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_dispute_still_refreshes() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        ledger.state.lock().fail_send_for.insert(addr(1));
        let disputer = disputer(&ledger, Some("1"));

        let summary = disputer.query_and_dispute(None).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.submitted, 0);
        // Cycle refresh plus the forced one after the failed send
        assert_eq!(ledger.block_reads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_send_skips_forced_refresh() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, 9_000));
        let disputer = disputer(&ledger, Some("1.1"));

        assert!(disputer.query_and_dispute(None).await.unwrap().is_empty());
        assert_eq!(ledger.block_reads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_liquidation_time_near_max_is_not_ready() {
        let ledger = Arc::new(MockLedger::new(ACCOUNT));
        ledger.add_liquidation(liquidation(addr(1), LIQUIDATOR, LiquidationState::PreDispute, u64::MAX - 1));
        let client = Arc::new(ContractClient::new(
            ledger.clone(),
            ClientConfig {
                staleness_threshold_secs: 0,
                ..Default::default()
            },
        ));
        let disputer = Disputer::new(
            client,
            Arc::new(constant_price_feed(Some("1"))),
            Arc::new(FixedGas),
            DisputerConfig {
                dispute_delay_secs: 3_600,
                ..Default::default()
            },
        )
        .unwrap();

        let summary = disputer.query_and_dispute_with(|_| Some(fp("1"))).await.unwrap();
        assert!(summary.is_empty());
        assert!(ledger.sent().is_empty());
    }
}
