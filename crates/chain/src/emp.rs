//! Alloy-backed [`Ledger`] for an expiring multi-party financial contract.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! Providers are built per call from the stored RPC URL. Submissions go
//! through a wallet provider and are serialized by `send_lock` so the
//! signing account never has two transactions in flight.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::bindings::IExpiringMultiParty::{
    self, DisputeSettled, LiquidationCreated, LiquidationDisputed, LiquidationWithdrawn,
    NewSponsor,
};
use crate::bindings::{IERC20Metadata, RawLiquidation, Unsigned};
use crate::ledger::{
    ContractCall, ContractEvent, EventKind, EventRecord, GasSettings, Ledger, LedgerError,
    LiquidationData, LiquidationState, PositionData, TokenAddresses, TokenDecimals, TxReceipt,
};

/// Financial contract accessed over JSON-RPC.
pub struct EmpLedger {
    /// RPC endpoint
    rpc_url: Url,
    /// Financial contract address
    address: Address,
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    account: Address,
    /// Serializes submissions from `account`
    send_lock: Mutex<()>,
}

impl std::fmt::Debug for EmpLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmpLedger")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("address", &self.address)
            .field("account", &self.account)
            .finish()
    }
}

impl EmpLedger {
    /// Create a ledger for the contract at `address`, signing with `private_key`
    /// (with or without 0x prefix).
    pub fn new(rpc_url: &str, address: Address, private_key: &str) -> Result<Self, LedgerError> {
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| LedgerError::Config(format!("invalid RPC URL {}: {}", rpc_url, e)))?;

        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| LedgerError::Config(format!("invalid private key: {}", e)))?;
        let account = signer.address();

        info!(
            contract = %address,
            account = %account,
            "Ledger initialized"
        );

        Ok(Self {
            rpc_url,
            address,
            wallet: EthereumWallet::from(signer),
            account,
            send_lock: Mutex::new(()),
        })
    }

    /// Contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.rpc_url.clone())
    }

    /// Decode a contract log. Logs from other contracts or with unknown
    /// signatures yield `None`.
    fn decode_log(&self, log: &Log) -> Result<Option<ContractEvent>, LedgerError> {
        if log.address() != self.address {
            return Ok(None);
        }
        let Some(topic0) = log.topics().first().copied() else {
            return Ok(None);
        };

        let event = if topic0 == NewSponsor::SIGNATURE_HASH {
            let e = log.log_decode::<NewSponsor>().map_err(decode_error)?.inner.data;
            ContractEvent::NewSponsor { sponsor: e.sponsor }
        } else if topic0 == LiquidationCreated::SIGNATURE_HASH {
            let e = log
                .log_decode::<LiquidationCreated>()
                .map_err(decode_error)?
                .inner
                .data;
            ContractEvent::LiquidationCreated {
                sponsor: e.sponsor,
                liquidator: e.liquidator,
                liquidation_id: e.liquidationId,
                tokens_outstanding: e.tokensOutstanding,
                locked_collateral: e.lockedCollateral,
                liquidated_collateral: e.liquidatedCollateral,
                liquidation_time: e.liquidationTime.saturating_to::<u64>(),
            }
        } else if topic0 == LiquidationDisputed::SIGNATURE_HASH {
            let e = log
                .log_decode::<LiquidationDisputed>()
                .map_err(decode_error)?
                .inner
                .data;
            ContractEvent::LiquidationDisputed {
                sponsor: e.sponsor,
                liquidator: e.liquidator,
                disputer: e.disputer,
                liquidation_id: e.liquidationId,
                dispute_bond_amount: e.disputeBondAmount,
            }
        } else if topic0 == DisputeSettled::SIGNATURE_HASH {
            let e = log.log_decode::<DisputeSettled>().map_err(decode_error)?.inner.data;
            ContractEvent::DisputeSettled {
                caller: e.caller,
                sponsor: e.sponsor,
                liquidator: e.liquidator,
                disputer: e.disputer,
                liquidation_id: e.liquidationId,
                dispute_succeeded: e.disputeSucceeded,
            }
        } else if topic0 == LiquidationWithdrawn::SIGNATURE_HASH {
            let e = log
                .log_decode::<LiquidationWithdrawn>()
                .map_err(decode_error)?
                .inner
                .data;
            ContractEvent::LiquidationWithdrawn {
                caller: e.caller,
                paid_to_liquidator: e.paidToLiquidator,
                paid_to_disputer: e.paidToDisputer,
                paid_to_sponsor: e.paidToSponsor,
                liquidation_status: LiquidationState::try_from(e.liquidationStatus)?,
                settlement_price: e.settlementPrice,
            }
        } else {
            return Ok(None);
        };

        Ok(Some(event))
    }
}

fn decode_error(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Decode {
        what: "contract log",
        reason: err.to_string(),
    }
}

fn signature(kind: EventKind) -> alloy::primitives::B256 {
    match kind {
        EventKind::NewSponsor => NewSponsor::SIGNATURE_HASH,
        EventKind::LiquidationCreated => LiquidationCreated::SIGNATURE_HASH,
        EventKind::LiquidationDisputed => LiquidationDisputed::SIGNATURE_HASH,
        EventKind::DisputeSettled => DisputeSettled::SIGNATURE_HASH,
        EventKind::LiquidationWithdrawn => LiquidationWithdrawn::SIGNATURE_HASH,
    }
}

/// Decode a right-padded UTF-8 identifier such as `ETH/BTC`.
fn identifier_from_bytes32(raw: B256) -> Result<String, LedgerError> {
    let len = raw.iter().rposition(|&byte| byte != 0).map_or(0, |last| last + 1);
    String::from_utf8(raw[..len].to_vec()).map_err(|e| LedgerError::Decode {
        what: "price identifier",
        reason: e.to_string(),
    })
}

fn unsigned(raw_value: U256) -> Unsigned {
    Unsigned { rawValue: raw_value }
}

impl TryFrom<RawLiquidation> for LiquidationData {
    type Error = LedgerError;

    fn try_from(raw: RawLiquidation) -> Result<Self, Self::Error> {
        Ok(Self {
            sponsor: raw.sponsor,
            liquidator: raw.liquidator,
            state: LiquidationState::try_from(raw.state)?,
            liquidation_time: raw.liquidationTime.saturating_to::<u64>(),
            tokens_outstanding: raw.tokensOutstanding.rawValue,
            locked_collateral: raw.lockedCollateral.rawValue,
            liquidated_collateral: raw.liquidatedCollateral.rawValue,
            raw_unit_collateral: raw.rawUnitCollateral.rawValue,
            disputer: raw.disputer,
            settlement_price: raw.settlementPrice.rawValue,
            final_fee: raw.finalFee.rawValue,
        })
    }
}

#[async_trait]
impl Ledger for EmpLedger {
    fn account(&self) -> Address {
        self.account
    }

    async fn latest_block(&self) -> Result<u64, LedgerError> {
        self.provider()
            .get_block_number()
            .await
            .map_err(|e| LedgerError::rpc("eth_blockNumber", e))
    }

    async fn current_time(&self) -> Result<u64, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let time = emp
            .getCurrentTime()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("getCurrentTime", e))?;
        Ok(time._0.saturating_to::<u64>())
    }

    async fn collateral_requirement(&self) -> Result<U256, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let requirement = emp
            .collateralRequirement()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("collateralRequirement", e))?;
        Ok(requirement.rawValue)
    }

    async fn liquidation_liveness(&self) -> Result<u64, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let liveness = emp
            .liquidationLiveness()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("liquidationLiveness", e))?;
        Ok(liveness._0.saturating_to::<u64>())
    }

    async fn min_sponsor_tokens(&self) -> Result<U256, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let min_tokens = emp
            .minSponsorTokens()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("minSponsorTokens", e))?;
        Ok(min_tokens.rawValue)
    }

    async fn token_decimals(&self) -> Result<TokenDecimals, LedgerError> {
        let provider = self.provider();
        let tokens = self.token_addresses().await?;

        let collateral_token = IERC20Metadata::new(tokens.collateral, &provider);
        let synthetic_token = IERC20Metadata::new(tokens.synthetic, &provider);
        let (collateral, synthetic) = tokio::try_join!(
            async {
                collateral_token
                    .decimals()
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc("decimals", e))
            },
            async {
                synthetic_token
                    .decimals()
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc("decimals", e))
            },
        )?;

        Ok(TokenDecimals {
            collateral: collateral._0,
            synthetic: synthetic._0,
        })
    }

    async fn token_addresses(&self) -> Result<TokenAddresses, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);

        let (collateral, synthetic) = tokio::try_join!(
            async {
                emp.collateralCurrency()
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc("collateralCurrency", e))
            },
            async {
                emp.tokenCurrency()
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc("tokenCurrency", e))
            },
        )?;

        Ok(TokenAddresses {
            collateral: collateral._0,
            synthetic: synthetic._0,
        })
    }

    async fn price_identifier(&self) -> Result<String, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let identifier = emp
            .priceIdentifier()
            .call()
            .await
            .map_err(|e| LedgerError::rpc("priceIdentifier", e))?;
        identifier_from_bytes32(identifier._0)
    }

    async fn position(&self, sponsor: Address) -> Result<PositionData, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let raw = emp
            .positions(sponsor)
            .call()
            .await
            .map_err(|e| LedgerError::rpc("positions", e))?;

        Ok(PositionData {
            tokens_outstanding: raw.tokensOutstanding.rawValue,
            withdrawal_request_pass_timestamp: raw
                .withdrawalRequestPassTimestamp
                .saturating_to::<u64>(),
            withdrawal_request_amount: raw.withdrawalRequestAmount.rawValue,
            raw_collateral: raw.rawCollateral.rawValue,
            transfer_position_request_pass_timestamp: raw
                .transferPositionRequestPassTimestamp
                .saturating_to::<u64>(),
        })
    }

    async fn collateral(&self, sponsor: Address) -> Result<U256, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let collateral = emp
            .getCollateral(sponsor)
            .call()
            .await
            .map_err(|e| LedgerError::rpc("getCollateral", e))?;
        Ok(collateral._0.rawValue)
    }

    async fn liquidations(&self, sponsor: Address) -> Result<Vec<LiquidationData>, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);
        let raw = emp
            .getLiquidations(sponsor)
            .call()
            .await
            .map_err(|e| LedgerError::rpc("getLiquidations", e))?;

        raw._0.into_iter().map(LiquidationData::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventRecord>, LedgerError> {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(signature(kind))
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider()
            .get_logs(&filter)
            .await
            .map_err(|e| LedgerError::rpc("eth_getLogs", e))?;

        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = self.decode_log(log)? {
                records.push(EventRecord {
                    block_number: log.block_number.unwrap_or_default(),
                    tx_hash: log.transaction_hash,
                    event,
                });
            }
        }

        debug!(count = records.len(), "Fetched contract events");
        Ok(records)
    }

    async fn simulate(&self, call: &ContractCall) -> Result<U256, LedgerError> {
        let provider = self.provider();
        let emp = IExpiringMultiParty::new(self.address, &provider);

        match call {
            ContractCall::CreateLiquidation {
                sponsor,
                min_collateral_per_token,
                max_collateral_per_token,
                max_tokens_to_liquidate,
                deadline,
            } => {
                let ret = emp
                    .createLiquidation(
                        *sponsor,
                        unsigned(*min_collateral_per_token),
                        unsigned(*max_collateral_per_token),
                        unsigned(*max_tokens_to_liquidate),
                        U256::from(*deadline),
                    )
                    .from(self.account)
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc(call.method(), e))?;
                Ok(ret.liquidationId)
            }
            ContractCall::Dispute {
                liquidation_id,
                sponsor,
            } => {
                let ret = emp
                    .dispute(*liquidation_id, *sponsor)
                    .from(self.account)
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc(call.method(), e))?;
                Ok(ret.totalPaid.rawValue)
            }
            ContractCall::WithdrawLiquidation {
                liquidation_id,
                sponsor,
            } => {
                let ret = emp
                    .withdrawLiquidation(*liquidation_id, *sponsor)
                    .from(self.account)
                    .call()
                    .await
                    .map_err(|e| LedgerError::rpc(call.method(), e))?;
                Ok(ret.amountWithdrawn.rawValue)
            }
        }
    }

    #[instrument(skip(self, call), fields(method = call.method()))]
    async fn send(&self, call: &ContractCall, gas: GasSettings) -> Result<TxReceipt, LedgerError> {
        let _guard = self.send_lock.lock().await;
        let start = Instant::now();

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());
        let emp = IExpiringMultiParty::new(self.address, &provider);

        let pending = match call {
            ContractCall::CreateLiquidation {
                sponsor,
                min_collateral_per_token,
                max_collateral_per_token,
                max_tokens_to_liquidate,
                deadline,
            } => {
                emp.createLiquidation(
                    *sponsor,
                    unsigned(*min_collateral_per_token),
                    unsigned(*max_collateral_per_token),
                    unsigned(*max_tokens_to_liquidate),
                    U256::from(*deadline),
                )
                .from(self.account)
                .gas(gas.gas_limit)
                .gas_price(gas.gas_price)
                .send()
                .await
            }
            ContractCall::Dispute {
                liquidation_id,
                sponsor,
            } => {
                emp.dispute(*liquidation_id, *sponsor)
                    .from(self.account)
                    .gas(gas.gas_limit)
                    .gas_price(gas.gas_price)
                    .send()
                    .await
            }
            ContractCall::WithdrawLiquidation {
                liquidation_id,
                sponsor,
            } => {
                emp.withdrawLiquidation(*liquidation_id, *sponsor)
                    .from(self.account)
                    .gas(gas.gas_limit)
                    .gas_price(gas.gas_price)
                    .send()
                    .await
            }
        }
        .map_err(|e| LedgerError::rpc(call.method(), e))?;

        let tx_hash = *pending.tx_hash();
        info!(
            tx_hash = %tx_hash,
            gas_limit = gas.gas_limit,
            gas_price_gwei = gas.gas_price / 1_000_000_000,
            "Transaction submitted, waiting for confirmation"
        );

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::rpc("eth_getTransactionReceipt", e))?;

        if !receipt.status() {
            warn!(tx_hash = %tx_hash, "Transaction reverted");
            return Err(LedgerError::Reverted { tx_hash });
        }

        let mut events = Vec::new();
        for log in receipt.inner.logs() {
            if let Some(event) = self.decode_log(log)? {
                events.push(event);
            }
        }

        info!(
            tx_hash = %tx_hash,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            total_ms = start.elapsed().as_millis(),
            "Transaction confirmed"
        );

        Ok(TxReceipt {
            tx_hash,
            block_number: receipt.block_number.unwrap_or(0),
            gas_used: receipt.gas_used,
            events,
        })
    }
}
