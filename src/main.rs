//! Risk agent for an expiring multi-party synthetic-asset contract.
//!
//! Liquidates under-collateralized sponsor positions and disputes
//! liquidations that were made against collateralized positions.
//! Features:
//! - Exchange, AMM and medianized price feeds built from configuration
//! - Simulation before every submission
//! - One-shot mode when the polling delay is 0

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use risk_agent_api::HttpNetworker;
use risk_agent_chain::{EmpLedger, GasEstimator, Ledger, RpcGasEstimator};
use risk_agent_core::{
    create_price_feed, resolve_price_feed_config, Agent, AgentConfig, ContractClient,
    ContractEventClient, Disputer, FeedContext, FixedPoint, Liquidator, SystemClock,
};

/// Environment variable names.
mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const EMP_ADDRESS: &str = "EMP_ADDRESS";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const AGENT_CONFIG: &str = "AGENT_CONFIG";
    pub const AGENT_MODE: &str = "AGENT_MODE";
    pub const MAX_TOKENS_TO_LIQUIDATE: &str = "MAX_TOKENS_TO_LIQUIDATE";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const UNISWAP_ADDRESS: &str = "UNISWAP_ADDRESS";
}

/// Which engines to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Liquidator,
    Disputer,
    Both,
}

impl Mode {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "liquidator" => Ok(Self::Liquidator),
            "disputer" => Ok(Self::Disputer),
            "both" => Ok(Self::Both),
            other => anyhow::bail!("Invalid {}: {:?} (expected liquidator, disputer or both)", env::AGENT_MODE, other),
        }
    }

    fn liquidates(&self) -> bool {
        matches!(self, Self::Liquidator | Self::Both)
    }

    fn disputes(&self) -> bool {
        matches!(self, Self::Disputer | Self::Both)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let env = load_env()?;
    let config = AgentConfig::load(env.config_path.as_deref())?;
    config.log_config();

    let agent = initialize_components(&config, &env).await?;
    agent.run().await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,risk_agent_core=debug,risk_agent_chain=debug"));
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}

/// Settings loaded from environment.
struct Env {
    rpc_url: String,
    emp_address: Address,
    private_key: String,
    config_path: Option<PathBuf>,
    mode: Mode,
    /// Decimal amount in synthetic tokens
    max_tokens: Option<String>,
    /// Pair used instead of the derived Uniswap V2 address
    uniswap_address: Option<Address>,
}

fn load_env() -> Result<Env> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    Ok(Env {
        rpc_url: get_env(env::RPC_URL)?,
        emp_address: get_env(env::EMP_ADDRESS)?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", env::EMP_ADDRESS, e))?,
        private_key: get_env(env::PRIVATE_KEY)?,
        config_path: std::env::var(env::AGENT_CONFIG).ok().map(PathBuf::from),
        mode: std::env::var(env::AGENT_MODE)
            .ok()
            .map(|mode| Mode::parse(&mode))
            .transpose()?
            .unwrap_or(Mode::Both),
        max_tokens: std::env::var(env::MAX_TOKENS_TO_LIQUIDATE).ok(),
        uniswap_address: std::env::var(env::UNISWAP_ADDRESS)
            .ok()
            .map(|text| {
                text.parse()
                    .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", env::UNISWAP_ADDRESS, e))
            })
            .transpose()?,
    })
}

async fn initialize_components(config: &AgentConfig, env: &Env) -> Result<Agent> {
    info!("Initializing components...");

    let ledger: Arc<dyn Ledger> = Arc::new(EmpLedger::new(&env.rpc_url, env.emp_address, &env.private_key)?);
    let decimals = ledger.token_decimals().await?;
    info!(
        emp = %env.emp_address,
        account = %ledger.account(),
        collateral_decimals = decimals.collateral,
        synthetic_decimals = decimals.synthetic,
        mode = ?env.mode,
        "Ledger initialized"
    );

    let max_tokens = env
        .max_tokens
        .as_deref()
        .map(|text| {
            FixedPoint::parse(text, decimals.synthetic)
                .map(|amount| amount.raw())
                .with_context(|| format!("Invalid {}", env::MAX_TOKENS_TO_LIQUIDATE))
        })
        .transpose()?
        .filter(|amount: &U256| !amount.is_zero());

    let gas: Arc<dyn GasEstimator> = Arc::new(
        RpcGasEstimator::new(&env.rpc_url)?
            .with_multiplier(config.gas.multiplier)
            .with_bounds(config.gas.floor_wei(), config.gas.cap_wei())
            .with_min_update_interval(config.gas.update_interval()),
    );

    let feed_config =
        resolve_price_feed_config(ledger.as_ref(), config.price_feed.as_ref(), env.uniswap_address).await?;
    let feed_ctx = FeedContext::with_rpc(Arc::new(HttpNetworker::new()), Arc::new(SystemClock), &env.rpc_url);
    let price_feed = Arc::new(create_price_feed(&feed_config, &feed_ctx)?);
    info!(
        feed = price_feed.name(),
        lookback = price_feed.lookback(),
        decimals = price_feed.decimals(),
        "Price feed initialized"
    );

    let client = Arc::new(ContractClient::new(ledger.clone(), config.client.clone()));
    let mut agent = Agent::new(config.polling_delay())
        .with_max_tokens(max_tokens)
        .with_event_client(ContractEventClient::new(ledger, config.client.start_block));

    if env.mode.liquidates() {
        agent = agent.with_liquidator(Liquidator::new(
            client.clone(),
            price_feed.clone(),
            gas.clone(),
            config.liquidator.clone(),
        )?);
    }
    if env.mode.disputes() {
        agent = agent.with_disputer(Disputer::new(client, price_feed, gas, config.disputer.clone())?);
    }
    Ok(agent)
}

