//! In-memory collaborators for unit tests.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use risk_agent_api::{NetworkError, Networker};
use risk_agent_chain::{
    ContractCall, ContractEvent, EventKind, EventRecord, GasEstimator, GasSettings, Ledger,
    LedgerError, LiquidationData, LiquidationState, PositionData, ReserveSample, ReserveSource,
    TokenAddresses, TokenDecimals, TxReceipt,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::price_feed::{AmmFeedParams, AmmPriceFeed, PriceFeed};

/// Networker answering by URL substring.
#[derive(Debug, Default)]
pub struct MockNetworker {
    routes: Mutex<Vec<(String, Value)>>,
    requested: Mutex<Vec<String>>,
}

impl MockNetworker {
    /// Answer URLs containing `pattern` with `response`, replacing any
    /// earlier answer for the same pattern.
    pub fn respond(&self, pattern: &str, response: Value) {
        let mut routes = self.routes.lock();
        routes.retain(|(existing, _)| existing != pattern);
        routes.push((pattern.to_string(), response));
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Networker for MockNetworker {
    async fn get_json(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Value, NetworkError> {
        self.requested.lock().push(url.to_string());
        self.routes
            .lock()
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| NetworkError::InvalidResponse {
                url: url.to_string(),
                reason: "no mock response".to_string(),
            })
    }
}

/// Fixed reserve history.
#[derive(Debug)]
pub struct MockReserveSource {
    decimals: (u8, u8),
    samples: Mutex<Vec<ReserveSample>>,
    fail: AtomicBool,
}

impl MockReserveSource {
    pub fn new(decimals: (u8, u8), samples: Vec<ReserveSample>) -> Self {
        Self {
            decimals,
            samples: Mutex::new(samples),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_samples(&self, samples: Vec<ReserveSample>) {
        *self.samples.lock() = samples;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LedgerError::rpc("eth_getLogs", "mock failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReserveSource for MockReserveSource {
    async fn token_decimals(&self) -> Result<(u8, u8), LedgerError> {
        self.check()?;
        Ok(self.decimals)
    }

    async fn samples_since(&self, _earliest_time: u64) -> Result<Vec<ReserveSample>, LedgerError> {
        self.check()?;
        Ok(self.samples.lock().clone())
    }
}

/// Gas estimator with a fixed price.
#[derive(Debug, Default)]
pub struct FixedGas;

#[async_trait]
impl GasEstimator for FixedGas {
    async fn update(&self) {}

    fn fast_price(&self) -> u128 {
        1_000_000_000
    }
}

/// Contract state the mock ledger serves.
#[derive(Debug)]
pub struct LedgerState {
    pub block: u64,
    pub time: u64,
    pub collateral_requirement: U256,
    pub liveness: u64,
    pub min_sponsor_tokens: U256,
    pub decimals: TokenDecimals,
    pub tokens: TokenAddresses,
    pub identifier: String,
    pub positions: HashMap<Address, PositionData>,
    /// Net collateral; falls back to the position's raw collateral
    pub collateral: HashMap<Address, U256>,
    pub liquidations: HashMap<Address, Vec<LiquidationData>>,
    pub events: Vec<EventRecord>,
    /// Amount returned by a successful withdrawal simulation
    pub withdraw_amount: U256,
    pub fail_reads: bool,
    pub fail_events: bool,
    /// Sponsors whose calls fail simulation
    pub fail_simulate_for: HashSet<Address>,
    /// Sponsors whose calls fail submission
    pub fail_send_for: HashSet<Address>,
    pub simulated: Vec<ContractCall>,
    pub sent: Vec<(ContractCall, GasSettings)>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            block: 100,
            time: 10_000,
            collateral_requirement: wad("1.2"),
            liveness: 7200,
            min_sponsor_tokens: wad("5"),
            decimals: TokenDecimals::default(),
            tokens: TokenAddresses {
                collateral: Address::repeat_byte(0xc0),
                synthetic: Address::repeat_byte(0x5e),
            },
            identifier: "ETH/BTC".to_string(),
            positions: HashMap::new(),
            collateral: HashMap::new(),
            liquidations: HashMap::new(),
            events: Vec::new(),
            withdraw_amount: wad("10"),
            fail_reads: false,
            fail_events: false,
            fail_simulate_for: HashSet::new(),
            fail_send_for: HashSet::new(),
            simulated: Vec::new(),
            sent: Vec::new(),
        }
    }
}

/// Ledger backed by [`LedgerState`].
#[derive(Debug)]
pub struct MockLedger {
    account: Address,
    pub state: Mutex<LedgerState>,
    /// Number of `latest_block` reads, one per refresh that reaches the ledger
    pub block_reads: AtomicUsize,
    position_reads_in_flight: AtomicUsize,
    /// Highest number of overlapping `position` reads seen
    pub max_position_reads_in_flight: AtomicUsize,
}

impl MockLedger {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            state: Mutex::new(LedgerState::default()),
            block_reads: AtomicUsize::new(0),
            position_reads_in_flight: AtomicUsize::new(0),
            max_position_reads_in_flight: AtomicUsize::new(0),
        }
    }

    /// Register a sponsor through a `NewSponsor` event and give it a position.
    pub fn add_position(&self, sponsor: Address, tokens: &str, collateral: &str) {
        let mut state = self.state.lock();
        let block = state.block;
        state.events.push(EventRecord {
            block_number: block,
            tx_hash: None,
            event: ContractEvent::NewSponsor { sponsor },
        });
        state.positions.insert(
            sponsor,
            PositionData {
                tokens_outstanding: wad(tokens),
                raw_collateral: wad(collateral),
                ..Default::default()
            },
        );
    }

    /// Record a liquidation, registering its sponsor if needed.
    pub fn add_liquidation(&self, liquidation: LiquidationData) {
        let mut state = self.state.lock();
        let sponsor = liquidation.sponsor;
        let registered = state
            .events
            .iter()
            .any(|record| record.event == ContractEvent::NewSponsor { sponsor });
        if !registered {
            let block = state.block;
            state.events.push(EventRecord {
                block_number: block,
                tx_hash: None,
                event: ContractEvent::NewSponsor { sponsor },
            });
        }
        state
            .liquidations
            .entry(liquidation.sponsor)
            .or_default()
            .push(liquidation);
    }

    pub fn sent(&self) -> Vec<ContractCall> {
        self.state.lock().sent.iter().map(|(call, _)| call.clone()).collect()
    }

    fn read_check(&self, method: &'static str) -> Result<(), LedgerError> {
        if self.state.lock().fail_reads {
            return Err(LedgerError::rpc(method, "mock failure"));
        }
        Ok(())
    }
}

/// The sponsor a call targets.
pub fn call_sponsor(call: &ContractCall) -> Address {
    match call {
        ContractCall::CreateLiquidation { sponsor, .. }
        | ContractCall::Dispute { sponsor, .. }
        | ContractCall::WithdrawLiquidation { sponsor, .. } => *sponsor,
    }
}

/// AMM feed holding `price` (18 decimals) from time 0, or no price at all.
/// Its clock stands at 10_000 with a 7200 second lookback.
pub fn constant_price_feed(price: Option<&str>) -> PriceFeed {
    let samples = price
        .map(|price| {
            vec![ReserveSample {
                timestamp: 0,
                block_number: 1,
                log_index: 0,
                reserve0: wad("1"),
                reserve1: wad(price),
            }]
        })
        .unwrap_or_default();
    PriceFeed::Amm(AmmPriceFeed::new(
        Arc::new(MockReserveSource::new((18, 18), samples)),
        Arc::new(ManualClock::new(10_000)),
        AmmFeedParams {
            twap_length: 60,
            lookback: 7200,
            invert_price: false,
            decimals: 18,
        },
    ))
}

/// 18-decimal raw value of decimal text.
pub fn wad(text: &str) -> U256 {
    crate::fixed_point::FixedPoint::parse(text, 18)
        .map(|value| value.raw())
        .unwrap_or_default()
}

/// A liquidation in `state` created at `liquidation_time`.
pub fn liquidation(
    sponsor: Address,
    liquidator: Address,
    state: LiquidationState,
    liquidation_time: u64,
) -> LiquidationData {
    LiquidationData {
        sponsor,
        liquidator,
        state,
        liquidation_time,
        tokens_outstanding: wad("100"),
        locked_collateral: wad("125"),
        liquidated_collateral: wad("125"),
        raw_unit_collateral: wad("1"),
        disputer: Address::ZERO,
        settlement_price: U256::ZERO,
        final_fee: U256::ZERO,
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn account(&self) -> Address {
        self.account
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        self.read_check("eth_blockNumber")?;
        self.block_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().block)
    }

    async fn current_time(&self) -> Result<u64, LedgerError> {
        self.read_check("getCurrentTime")?;
        Ok(self.state.lock().time)
    }

    async fn collateral_requirement(&self) -> Result<U256, LedgerError> {
        self.read_check("collateralRequirement")?;
        Ok(self.state.lock().collateral_requirement)
    }

    async fn liquidation_liveness(&self) -> Result<u64, LedgerError> {
        self.read_check("liquidationLiveness")?;
        Ok(self.state.lock().liveness)
    }

    async fn min_sponsor_tokens(&self) -> Result<U256, LedgerError> {
        self.read_check("minSponsorTokens")?;
        Ok(self.state.lock().min_sponsor_tokens)
    }

    async fn token_decimals(&self) -> Result<TokenDecimals, LedgerError> {
        self.read_check("decimals")?;
        Ok(self.state.lock().decimals)
    }

    async fn token_addresses(&self) -> Result<TokenAddresses, LedgerError> {
        self.read_check("tokenCurrency")?;
        Ok(self.state.lock().tokens)
    }

    async fn price_identifier(&self) -> Result<String, LedgerError> {
        self.read_check("priceIdentifier")?;
        Ok(self.state.lock().identifier.clone())
    }

    async fn position(&self, sponsor: Address) -> Result<PositionData, LedgerError> {
        self.read_check("positions")?;
        let in_flight = self.position_reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_position_reads_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.position_reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self
            .state
            .lock()
            .positions
            .get(&sponsor)
            .cloned()
            .unwrap_or_default())
    }

    async fn collateral(&self, sponsor: Address) -> Result<U256, LedgerError> {
        self.read_check("getCollateral")?;
        let state = self.state.lock();
        Ok(state.collateral.get(&sponsor).copied().unwrap_or_else(|| {
            state
                .positions
                .get(&sponsor)
                .map(|p| p.raw_collateral)
                .unwrap_or_default()
        }))
    }

    async fn liquidations(&self, sponsor: Address) -> Result<Vec<LiquidationData>, LedgerError> {
        self.read_check("getLiquidations")?;
        Ok(self
            .state
            .lock()
            .liquidations
            .get(&sponsor)
            .cloned()
            .unwrap_or_default())
    }

    async fn events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, LedgerError> {
        let state = self.state.lock();
        if state.fail_events {
            return Err(LedgerError::rpc("eth_getLogs", "mock failure"));
        }
        Ok(state
            .events
            .iter()
            .filter(|record| record.event.kind() == kind)
            .filter(|record| (from_block..=to_block).contains(&record.block_number))
            .cloned()
            .collect())
    }

    async fn simulate(&self, call: &ContractCall) -> Result<U256, LedgerError> {
        let mut state = self.state.lock();
        state.simulated.push(call.clone());
        if state.fail_simulate_for.contains(&call_sponsor(call)) {
            return Err(LedgerError::rpc(call.method(), "execution reverted"));
        }
        Ok(match call {
            ContractCall::WithdrawLiquidation { .. } => state.withdraw_amount,
            _ => U256::from(1u64),
        })
    }

    async fn send(&self, call: &ContractCall, gas: GasSettings) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock();
        if state.fail_send_for.contains(&call_sponsor(call)) {
            return Err(LedgerError::Reverted { tx_hash: B256::ZERO });
        }
        state.sent.push((call.clone(), gas));
        let account = self.account;
        let event = match call {
            ContractCall::CreateLiquidation {
                sponsor,
                max_tokens_to_liquidate,
                ..
            } => ContractEvent::LiquidationCreated {
                sponsor: *sponsor,
                liquidator: account,
                liquidation_id: U256::ZERO,
                tokens_outstanding: *max_tokens_to_liquidate,
                locked_collateral: wad("125"),
                liquidated_collateral: wad("125"),
                liquidation_time: state.time,
            },
            ContractCall::Dispute {
                liquidation_id,
                sponsor,
            } => ContractEvent::LiquidationDisputed {
                sponsor: *sponsor,
                liquidator: Address::ZERO,
                disputer: account,
                liquidation_id: *liquidation_id,
                dispute_bond_amount: wad("1"),
            },
            ContractCall::WithdrawLiquidation {
                liquidation_id,
                sponsor,
            } => {
                let status = state
                    .liquidations
                    .get(sponsor)
                    .and_then(|list| list.get(liquidation_id.saturating_to::<usize>()))
                    .map(|l| l.state)
                    .unwrap_or(LiquidationState::Uninitialized);
                ContractEvent::LiquidationWithdrawn {
                    caller: account,
                    paid_to_liquidator: state.withdraw_amount,
                    paid_to_disputer: U256::ZERO,
                    paid_to_sponsor: U256::ZERO,
                    liquidation_status: status,
                    settlement_price: U256::ZERO,
                }
            }
        };
        Ok(TxReceipt {
            tx_hash: B256::repeat_byte(0xab),
            block_number: state.block,
            gas_used: 21_000,
            events: vec![event],
        })
    }
}
