//! Incremental replay of the financial contract's events.
//!
//! Each [`ContractEventClient::refresh`] queries every event kind from the
//! cursor block to the latest block. The cursor only moves once all queries
//! of a batch succeeded, so a failed batch is retried from the same block.
//! The getters return the events of the most recent batch.

use parking_lot::{Mutex, RwLock};
use risk_agent_chain::{EventKind, EventRecord, Ledger, LedgerError};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default)]
struct EventBatch {
    new_sponsors: Vec<EventRecord>,
    liquidations: Vec<EventRecord>,
    disputes: Vec<EventRecord>,
    dispute_settlements: Vec<EventRecord>,
    withdrawals: Vec<EventRecord>,
}

#[derive(Debug)]
pub struct ContractEventClient {
    ledger: Arc<dyn Ledger>,
    /// First block of the next batch
    next_block: Mutex<u64>,
    batch: RwLock<EventBatch>,
}

impl ContractEventClient {
    pub fn new(ledger: Arc<dyn Ledger>, start_block: u64) -> Self {
        Self {
            ledger,
            next_block: Mutex::new(start_block),
            batch: RwLock::new(EventBatch::default()),
        }
    }

    /// Fetch events since the last successful batch. Returns the number of
    /// events found.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, LedgerError> {
        let from_block = *self.next_block.lock();
        let to_block = self.ledger.latest_block().await?;
        if from_block > to_block {
            return Ok(0);
        }

        let ledger = self.ledger.as_ref();
        let (new_sponsors, liquidations, disputes, dispute_settlements, withdrawals) = tokio::try_join!(
            ledger.events(EventKind::NewSponsor, from_block, to_block),
            ledger.events(EventKind::LiquidationCreated, from_block, to_block),
            ledger.events(EventKind::LiquidationDisputed, from_block, to_block),
            ledger.events(EventKind::DisputeSettled, from_block, to_block),
            ledger.events(EventKind::LiquidationWithdrawn, from_block, to_block),
        )?;

        let batch = EventBatch {
            new_sponsors,
            liquidations,
            disputes,
            dispute_settlements,
            withdrawals,
        };
        let count = batch.new_sponsors.len()
            + batch.liquidations.len()
            + batch.disputes.len()
            + batch.dispute_settlements.len()
            + batch.withdrawals.len();

        debug!(
            at = "ContractEventClient",
            from_block,
            to_block,
            new_sponsors = batch.new_sponsors.len(),
            liquidations = batch.liquidations.len(),
            disputes = batch.disputes.len(),
            dispute_settlements = batch.dispute_settlements.len(),
            withdrawals = batch.withdrawals.len(),
            "Event batch fetched"
        );

        *self.batch.write() = batch;
        *self.next_block.lock() = to_block + 1;
        Ok(count)
    }

    pub fn next_block(&self) -> u64 {
        *self.next_block.lock()
    }

    pub fn new_sponsor_events(&self) -> Vec<EventRecord> {
        self.batch.read().new_sponsors.clone()
    }

    pub fn liquidation_events(&self) -> Vec<EventRecord> {
        self.batch.read().liquidations.clone()
    }

    pub fn dispute_events(&self) -> Vec<EventRecord> {
        self.batch.read().disputes.clone()
    }

    pub fn dispute_settlement_events(&self) -> Vec<EventRecord> {
        self.batch.read().dispute_settlements.clone()
    }

    pub fn withdrawal_events(&self) -> Vec<EventRecord> {
        self.batch.read().withdrawals.clone()
    }
}
