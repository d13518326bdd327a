//! AMM pair reserve history.
//!
//! [`UniswapPairSource`] reconstructs the reserve history of a constant-product
//! pair from its `Sync` logs. The search walks backwards from the latest block,
//! doubling the block window until the oldest log found is at or before the
//! requested time, or the window reaches genesis.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{address, b256, keccak256, Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::{debug, instrument};

use crate::bindings::IUniswapV2Pair::{self, Sync as SyncEvent};
use crate::bindings::IERC20Metadata;
use crate::ledger::LedgerError;

/// Padding applied to the average block time when sizing the first window.
const BUFFER_BLOCK_PERCENT: f64 = 1.1;

/// Uniswap V2 factory, deployed at the same address on mainnet and the public testnets.
pub const UNISWAP_V2_FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");

/// Hash of the pair contract creation code.
const UNISWAP_V2_PAIR_INIT_CODE_HASH: B256 =
    b256!("96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f");

/// Address of the Uniswap V2 pair for `base`/`quote`, and whether `base`
/// sorts as token1. Prices read from the pair are quote per base only when
/// that flag is false; otherwise they must be inverted.
pub fn uniswap_v2_pair(base: Address, quote: Address) -> (Address, bool) {
    let inverted = base > quote;
    let (token0, token1) = if inverted { (quote, base) } else { (base, quote) };
    let mut packed = [0u8; 40];
    packed[..20].copy_from_slice(token0.as_slice());
    packed[20..].copy_from_slice(token1.as_slice());
    let pair = UNISWAP_V2_FACTORY.create2(keccak256(packed), UNISWAP_V2_PAIR_INIT_CODE_HASH);
    (pair, inverted)
}

/// Pair reserves after one `Sync` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveSample {
    /// Timestamp of the block containing the event
    pub timestamp: u64,
    pub block_number: u64,
    pub log_index: u64,
    pub reserve0: U256,
    pub reserve1: U256,
}

/// History of an AMM pair's reserves.
#[async_trait]
pub trait ReserveSource: Send + Sync + Debug {
    /// Decimals of `(token0, token1)`.
    async fn token_decimals(&self) -> Result<(u8, u8), LedgerError>;

    /// Samples ordered by block and log index, starting with the last sample
    /// at or before `earliest_time` when one exists.
    async fn samples_since(&self, earliest_time: u64) -> Result<Vec<ReserveSample>, LedgerError>;
}

/// Uniswap V2 style pair read over JSON-RPC.
#[derive(Debug)]
pub struct UniswapPairSource {
    rpc_url: Url,
    pair: Address,
    /// Average seconds per block on this chain
    average_block_time: f64,
    /// Block number -> timestamp, pruned to the last search window
    block_times: Mutex<HashMap<u64, u64>>,
    decimals: Mutex<Option<(u8, u8)>>,
}

impl UniswapPairSource {
    pub fn new(rpc_url: &str, pair: Address) -> Result<Self, LedgerError> {
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| LedgerError::Config(format!("invalid RPC URL {}: {}", rpc_url, e)))?;

        Ok(Self {
            rpc_url,
            pair,
            average_block_time: 13.0,
            block_times: Mutex::new(HashMap::new()),
            decimals: Mutex::new(None),
        })
    }

    /// Override the average block time used to size the first search window.
    pub fn with_average_block_time(mut self, seconds: f64) -> Self {
        if seconds > 0.0 {
            self.average_block_time = seconds;
        }
        self
    }

    pub fn pair(&self) -> Address {
        self.pair
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.rpc_url.clone())
    }

    async fn block_time<P: Provider>(&self, provider: &P, block: u64) -> Result<u64, LedgerError> {
        if let Some(time) = self.block_times.lock().get(&block).copied() {
            return Ok(time);
        }

        let header = provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await
            .map_err(|e| LedgerError::rpc("eth_getBlockByNumber", e))?
            .ok_or_else(|| LedgerError::rpc("eth_getBlockByNumber", format!("block {} not found", block)))?;

        let time = header.header.timestamp;
        self.block_times.lock().insert(block, time);
        Ok(time)
    }

    async fn sync_logs<P: Provider>(
        &self,
        provider: &P,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, LedgerError> {
        let filter = Filter::new()
            .address(self.pair)
            .event_signature(SyncEvent::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        provider
            .get_logs(&filter)
            .await
            .map_err(|e| LedgerError::rpc("eth_getLogs", e))
    }
}

/// Blocks to search for a `window` of seconds given the average block time.
fn initial_block_window(window: u64, average_block_time: f64) -> u64 {
    let estimate = average_block_time * BUFFER_BLOCK_PERCENT;
    ((window as f64 / estimate).ceil() as u64).max(1)
}

/// Forget timestamps of blocks before `first_block`. A later miss only costs
/// one extra header fetch.
fn prune_block_times(cache: &mut HashMap<u64, u64>, first_block: u64) {
    cache.retain(|&block, _| block >= first_block);
}

/// Decode a `Sync` log into `(block, log_index, reserve0, reserve1)`.
fn decode_sync(log: &Log) -> Result<(u64, u64, U256, U256), LedgerError> {
    let event = log
        .log_decode::<SyncEvent>()
        .map_err(|e| LedgerError::Decode {
            what: "Sync log",
            reason: e.to_string(),
        })?
        .inner
        .data;

    Ok((
        log.block_number.unwrap_or_default(),
        log.log_index.unwrap_or_default(),
        U256::from(event.reserve0.to::<u128>()),
        U256::from(event.reserve1.to::<u128>()),
    ))
}

#[async_trait]
impl ReserveSource for UniswapPairSource {
    async fn token_decimals(&self) -> Result<(u8, u8), LedgerError> {
        if let Some(decimals) = *self.decimals.lock() {
            return Ok(decimals);
        }

        let provider = self.provider();
        let pair = IUniswapV2Pair::new(self.pair, &provider);
        let token0 = pair
            .token0()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("token0", e))?
            ._0;
        let token1 = pair
            .token1()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("token1", e))?
            ._0;

        let decimals0 = IERC20Metadata::new(token0, &provider)
            .decimals()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("decimals", e))?
            ._0;
        let decimals1 = IERC20Metadata::new(token1, &provider)
            .decimals()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("decimals", e))?
            ._0;

        *self.decimals.lock() = Some((decimals0, decimals1));
        Ok((decimals0, decimals1))
    }

    #[instrument(skip(self), fields(pair = %self.pair))]
    async fn samples_since(&self, earliest_time: u64) -> Result<Vec<ReserveSample>, LedgerError> {
        let provider = self.provider();
        let latest_block = provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::rpc("eth_blockNumber", e))?;
        let latest_time = self.block_time(&provider, latest_block).await?;

        let mut blocks_to_search = initial_block_window(
            latest_time.saturating_sub(earliest_time),
            self.average_block_time,
        );

        let mut logs = loop {
            let from_block = latest_block.saturating_sub(blocks_to_search);
            let logs = self.sync_logs(&provider, from_block, latest_block).await?;

            if from_block == 0 {
                break logs;
            }
            if let Some(first_block) = logs.iter().filter_map(|log| log.block_number).min() {
                if self.block_time(&provider, first_block).await? <= earliest_time {
                    break logs;
                }
            }
            blocks_to_search = blocks_to_search.saturating_mul(2);
        };

        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut samples = Vec::with_capacity(logs.len());
        for log in &logs {
            let (block_number, log_index, reserve0, reserve1) = decode_sync(log)?;
            samples.push(ReserveSample {
                timestamp: self.block_time(&provider, block_number).await?,
                block_number,
                log_index,
                reserve0,
                reserve1,
            });
        }

        // Drop samples superseded before the window starts, keeping the one in force at `earliest_time`
        let first_in_force = samples
            .iter()
            .rposition(|sample| sample.timestamp <= earliest_time)
            .unwrap_or(0);
        samples.drain(..first_in_force);

        let oldest_needed = samples.first().map_or(latest_block, |sample| sample.block_number);
        prune_block_times(&mut self.block_times.lock(), oldest_needed);

        debug!(
            count = samples.len(),
            blocks_searched = blocks_to_search,
            "Fetched reserve samples"
        );
        Ok(samples)
    }
}
