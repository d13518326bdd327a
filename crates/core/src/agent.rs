//! Polling loop driving the engines.

use alloy::primitives::U256;
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::disputer::Disputer;
use crate::events::ContractEventClient;
use crate::execution::ActionSummary;
use crate::liquidator::Liquidator;

/// What one cycle did, per step. Steps of a missing engine stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub liquidations: Option<ActionSummary>,
    pub liquidation_withdrawals: Option<ActionSummary>,
    pub disputes: Option<ActionSummary>,
    pub dispute_withdrawals: Option<ActionSummary>,
    /// Events replayed by the event client
    pub events: Option<usize>,
}

/// Runs the liquidator and disputer on a fixed delay.
#[derive(Debug)]
pub struct Agent {
    liquidator: Option<Liquidator>,
    disputer: Option<Disputer>,
    events: Option<ContractEventClient>,
    max_tokens: Option<U256>,
    polling_delay: Duration,
}

impl Agent {
    /// A zero `polling_delay` makes [`Agent::run`] stop after one cycle.
    pub fn new(polling_delay: Duration) -> Self {
        Self {
            liquidator: None,
            disputer: None,
            events: None,
            max_tokens: None,
            polling_delay,
        }
    }

    pub fn with_liquidator(mut self, liquidator: Liquidator) -> Self {
        self.liquidator = Some(liquidator);
        self
    }

    pub fn with_disputer(mut self, disputer: Disputer) -> Self {
        self.disputer = Some(disputer);
        self
    }

    pub fn with_event_client(mut self, events: ContractEventClient) -> Self {
        self.events = Some(events);
        self
    }

    /// Cap on tokens liquidated per position.
    pub fn with_max_tokens(mut self, max_tokens: Option<U256>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Run cycles until interrupted, or once when the delay is zero. A failed
    /// cycle is logged and the next one starts after the usual delay.
    pub async fn run(&self) -> Result<()> {
        info!(
            at = "Agent",
            liquidator = self.liquidator.is_some(),
            disputer = self.disputer.is_some(),
            polling_delay_secs = self.polling_delay.as_secs(),
            "Starting polling loop"
        );
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(at = "Agent", error = %e, "Cycle failed");
            }
            if self.polling_delay.is_zero() {
                info!(at = "Agent", "Polling delay is 0, exiting after one cycle");
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(self.polling_delay) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(at = "Agent", "Interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Liquidate, withdraw liquidation rewards, dispute, then withdraw
    /// dispute rewards. The first failing step ends the cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        if let Some(liquidator) = &self.liquidator {
            report.liquidations = Some(liquidator.query_and_liquidate(self.max_tokens).await?);
            report.liquidation_withdrawals = Some(liquidator.query_and_withdraw_rewards().await?);
        }
        if let Some(disputer) = &self.disputer {
            report.disputes = Some(disputer.query_and_dispute(None).await?);
            report.dispute_withdrawals = Some(disputer.query_and_withdraw_rewards().await?);
        }
        if let Some(events) = &self.events {
            let count = events.refresh().await?;
            debug!(
                at = "Agent",
                events = count,
                liquidations = events.liquidation_events().len(),
                disputes = events.dispute_events().len(),
                settlements = events.dispute_settlement_events().len(),
                withdrawals = events.withdrawal_events().len(),
                next_block = events.next_block(),
                "Contract events replayed"
            );
            report.events = Some(count);
        }

        let count = |summary: Option<ActionSummary>| summary.map_or(0, |s| s.submitted);
        info!(
            at = "Agent",
            liquidated = count(report.liquidations),
            liquidation_withdrawals = count(report.liquidation_withdrawals),
            disputed = count(report.disputes),
            dispute_withdrawals = count(report.dispute_withdrawals),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }
}
