//! Builds price feed trees from declarative configuration.
//!
//! A `medianizer` entry lists nested feeds in `medianized_feeds`. Each nested
//! entry inherits every field of its parent except `type`, and its own
//! values take precedence.
//!
//! Contracts whose price identifier has a known feed need no configuration:
//! [`reference_feed_config`] starts from the built-in entry and overlays any
//! user settings on top. [`amm_feed_config`] does the same for the pair
//! trading the synthetic token against its collateral.

use alloy::primitives::Address;
use risk_agent_api::{CryptoWatchClient, Networker};
use risk_agent_chain::{uniswap_v2_pair, Ledger, LedgerError, ReserveSource, UniswapPairSource};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    AmmFeedParams, AmmPriceFeed, ExchangeFeedParams, ExchangePriceFeed, MedianPriceFeed, PriceFeed,
};
use crate::clock::Clock;
use crate::config::ConfigError;

/// Deepest allowed medianizer nesting.
const MAX_NESTING: usize = 8;

const DEFAULT_OHLC_PERIOD: u64 = 60;
const DEFAULT_DECIMALS: u8 = 18;

const DEFAULT_LOOKBACK: u64 = 7200;
/// Shorter than any block interval, so the AMM feed reports spot prices
const DEFAULT_AMM_TWAP_LENGTH: u64 = 2;

/// One node of a price feed tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedConfig {
    /// `cryptowatch`, `uniswap` or `medianizer`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub feed_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,

    /// Seconds of history kept for historical lookups
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_time_between_updates: Option<u64>,

    /// Candle length in seconds (default 60)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ohlc_period: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub invert_price: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniswap_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub twap_length: Option<u64>,

    /// Seconds per block used to size log queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_block_time: Option<f64>,

    /// Scale of reported prices (default 18)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,

    /// Average constituents instead of taking the median
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_mean: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub medianized_feeds: Option<Vec<PriceFeedConfig>>,
}

impl PriceFeedConfig {
    /// Effective configuration of a nested feed.
    pub fn merge_child(&self, child: &PriceFeedConfig) -> PriceFeedConfig {
        PriceFeedConfig {
            feed_type: child.feed_type.clone(),
            api_key: child.api_key.clone().or_else(|| self.api_key.clone()),
            exchange: child.exchange.clone().or_else(|| self.exchange.clone()),
            pair: child.pair.clone().or_else(|| self.pair.clone()),
            lookback: child.lookback.or(self.lookback),
            min_time_between_updates: child.min_time_between_updates.or(self.min_time_between_updates),
            ohlc_period: child.ohlc_period.or(self.ohlc_period),
            invert_price: child.invert_price.or(self.invert_price),
            uniswap_address: child.uniswap_address.clone().or_else(|| self.uniswap_address.clone()),
            twap_length: child.twap_length.or(self.twap_length),
            average_block_time: child.average_block_time.or(self.average_block_time),
            decimals: child.decimals.or(self.decimals),
            compute_mean: child.compute_mean.or(self.compute_mean),
            medianized_feeds: child
                .medianized_feeds
                .clone()
                .or_else(|| self.medianized_feeds.clone()),
        }
    }

    /// `self` with every field `user` sets replaced. Unlike
    /// [`merge_child`](Self::merge_child) the type is overridable and a user
    /// feed list replaces the default one whole.
    pub fn overlay(&self, user: &PriceFeedConfig) -> PriceFeedConfig {
        PriceFeedConfig {
            feed_type: user.feed_type.clone().or_else(|| self.feed_type.clone()),
            ..self.merge_child(user)
        }
    }

    /// Check the whole tree without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_NESTING {
            return Err(ConfigError::TooDeep(MAX_NESTING));
        }
        match self.feed_type.as_deref() {
            Some("cryptowatch") => {
                required(self.exchange.as_ref(), "cryptowatch", "exchange")?;
                required(self.pair.as_ref(), "cryptowatch", "pair")?;
                required(self.lookback, "cryptowatch", "lookback")?;
                required(
                    self.min_time_between_updates,
                    "cryptowatch",
                    "min_time_between_updates",
                )?;
                if self.ohlc_period == Some(0) {
                    return Err(ConfigError::invalid("price_feed.ohlc_period", "must be positive"));
                }
                Ok(())
            }
            Some("uniswap") => {
                required(self.uniswap_address.as_ref(), "uniswap", "uniswap_address")?;
                required(self.twap_length, "uniswap", "twap_length")?;
                required(self.lookback, "uniswap", "lookback")?;
                self.pair_address().map(|_| ())
            }
            Some("medianizer") => {
                let feeds = match &self.medianized_feeds {
                    Some(feeds) if !feeds.is_empty() => feeds,
                    _ => return Err(ConfigError::EmptyMedianizer),
                };
                feeds
                    .iter()
                    .try_for_each(|child| self.merge_child(child).validate_at(depth + 1))
            }
            Some(other) => Err(ConfigError::UnknownFeedType(other.to_string())),
            None => Err(ConfigError::MissingField {
                feed_type: "untyped".to_string(),
                field: "type",
            }),
        }
    }

    fn pair_address(&self) -> Result<Address, ConfigError> {
        let text = required(self.uniswap_address.as_deref(), "uniswap", "uniswap_address")?;
        Address::from_str(text)
            .map_err(|e| ConfigError::invalid("price_feed.uniswap_address", format!("{text:?}: {e}")))
    }

    fn decimals_or_default(&self) -> u8 {
        self.decimals.unwrap_or(DEFAULT_DECIMALS)
    }
}

fn required<T>(value: Option<T>, feed_type: &str, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        feed_type: feed_type.to_string(),
        field,
    })
}

/// Built-in feed for a price identifier.
pub fn default_reference_feed(identifier: &str) -> Option<PriceFeedConfig> {
    let exchange = |name: &str| PriceFeedConfig {
        feed_type: Some("cryptowatch".to_string()),
        exchange: Some(name.to_string()),
        ..Default::default()
    };
    match identifier {
        "ETH/BTC" => Some(PriceFeedConfig {
            feed_type: Some("medianizer".to_string()),
            pair: Some("ethbtc".to_string()),
            lookback: Some(DEFAULT_LOOKBACK),
            min_time_between_updates: Some(60),
            medianized_feeds: Some(vec![
                exchange("coinbase-pro"),
                exchange("binance"),
                exchange("bitstamp"),
            ]),
            ..Default::default()
        }),
        _ => None,
    }
}

/// Reference feed for a contract settling on `identifier`: the built-in
/// entry with `user` overlaid, or `user` alone when there is no built-in.
pub fn reference_feed_config(
    identifier: &str,
    user: Option<&PriceFeedConfig>,
) -> Result<PriceFeedConfig, ConfigError> {
    match (default_reference_feed(identifier), user) {
        (Some(default), Some(user)) => {
            debug!(
                at = "PriceFeedFactory",
                identifier, "Overlaying configured price feed on the built-in one"
            );
            Ok(default.overlay(user))
        }
        (Some(default), None) => Ok(default),
        (None, Some(user)) => Ok(user.clone()),
        (None, None) => Err(ConfigError::NoPriceFeed(identifier.to_string())),
    }
}

/// AMM feed for `pair` with near-spot TWAP defaults and `user` overlaid.
/// `inverted` is set when the synthetic token is the pair's token1.
pub fn amm_feed_config(pair: Address, inverted: bool, user: Option<&PriceFeedConfig>) -> PriceFeedConfig {
    let default = PriceFeedConfig {
        feed_type: Some("uniswap".to_string()),
        uniswap_address: Some(pair.to_string()),
        twap_length: Some(DEFAULT_AMM_TWAP_LENGTH),
        lookback: Some(DEFAULT_LOOKBACK),
        invert_price: Some(inverted),
        ..Default::default()
    };
    match user {
        Some(user) => default.overlay(user),
        None => default,
    }
}

/// Resolve the feed for the contract behind `ledger`: an AMM pair feed when
/// `user` asks for `uniswap`, otherwise the reference feed for the
/// contract's price identifier. `pair_override` replaces the derived pair.
pub async fn resolve_price_feed_config(
    ledger: &dyn Ledger,
    user: Option<&PriceFeedConfig>,
    pair_override: Option<Address>,
) -> anyhow::Result<PriceFeedConfig> {
    if user.and_then(|feed| feed.feed_type.as_deref()) == Some("uniswap") {
        let (pair, inverted) = match pair_override {
            Some(pair) => (pair, false),
            None => {
                let tokens = ledger.token_addresses().await?;
                uniswap_v2_pair(tokens.synthetic, tokens.collateral)
            }
        };
        info!(at = "PriceFeedFactory", %pair, inverted, "Using AMM pair price feed");
        return Ok(amm_feed_config(pair, inverted, user));
    }

    let identifier = ledger.price_identifier().await?;
    info!(
        at = "PriceFeedFactory",
        identifier = %identifier,
        configured = user.is_some(),
        "Resolving reference price feed"
    );
    Ok(reference_feed_config(&identifier, user)?)
}

/// Creates the reserve source for a pair address and optional block time.
pub type ReserveSourceBuilder =
    Arc<dyn Fn(Address, Option<f64>) -> Result<Arc<dyn ReserveSource>, LedgerError> + Send + Sync>;

/// Collaborators shared by every feed in a tree.
#[derive(Clone)]
pub struct FeedContext {
    pub networker: Arc<dyn Networker>,
    pub clock: Arc<dyn Clock>,
    pub reserve_sources: ReserveSourceBuilder,
}

impl std::fmt::Debug for FeedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedContext")
            .field("networker", &self.networker)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl FeedContext {
    pub fn new(
        networker: Arc<dyn Networker>,
        clock: Arc<dyn Clock>,
        reserve_sources: ReserveSourceBuilder,
    ) -> Self {
        Self {
            networker,
            clock,
            reserve_sources,
        }
    }

    /// Context whose AMM feeds read pair logs from `rpc_url`.
    pub fn with_rpc(networker: Arc<dyn Networker>, clock: Arc<dyn Clock>, rpc_url: &str) -> Self {
        let rpc_url = rpc_url.to_string();
        let reserve_sources: ReserveSourceBuilder = Arc::new(move |pair, average_block_time| {
            let mut source = UniswapPairSource::new(&rpc_url, pair)?;
            if let Some(seconds) = average_block_time {
                source = source.with_average_block_time(seconds);
            }
            Ok(Arc::new(source) as Arc<dyn ReserveSource>)
        });
        Self::new(networker, clock, reserve_sources)
    }
}

/// Validate `config` and build its feed tree. Nothing is built if any node
/// is invalid.
pub fn create_price_feed(config: &PriceFeedConfig, ctx: &FeedContext) -> Result<PriceFeed, ConfigError> {
    config.validate()?;
    build(config, ctx)
}

fn build(config: &PriceFeedConfig, ctx: &FeedContext) -> Result<PriceFeed, ConfigError> {
    match config.feed_type.as_deref() {
        Some("cryptowatch") => {
            let exchange = required(config.exchange.as_deref(), "cryptowatch", "exchange")?;
            let pair = required(config.pair.as_deref(), "cryptowatch", "pair")?;
            let lookback = required(config.lookback, "cryptowatch", "lookback")?;
            let min_time_between_updates = required(
                config.min_time_between_updates,
                "cryptowatch",
                "min_time_between_updates",
            )?;
            debug!(
                at = "PriceFeedFactory",
                exchange, pair, lookback, "Creating exchange price feed"
            );
            let client = CryptoWatchClient::new(
                ctx.networker.clone(),
                exchange,
                pair,
                config.api_key.clone(),
            );
            Ok(PriceFeed::Exchange(ExchangePriceFeed::new(
                client,
                ctx.clock.clone(),
                ExchangeFeedParams {
                    lookback,
                    ohlc_period: config.ohlc_period.unwrap_or(DEFAULT_OHLC_PERIOD),
                    min_time_between_updates,
                    invert_price: config.invert_price.unwrap_or(false),
                    decimals: config.decimals_or_default(),
                },
            )))
        }
        Some("uniswap") => {
            let pair = config.pair_address()?;
            let twap_length = required(config.twap_length, "uniswap", "twap_length")?;
            let lookback = required(config.lookback, "uniswap", "lookback")?;
            debug!(
                at = "PriceFeedFactory",
                %pair, twap_length, lookback, "Creating AMM price feed"
            );
            let source = (ctx.reserve_sources)(pair, config.average_block_time)
                .map_err(|e| ConfigError::invalid("price_feed.uniswap_address", e.to_string()))?;
            Ok(PriceFeed::Amm(AmmPriceFeed::new(
                source,
                ctx.clock.clone(),
                AmmFeedParams {
                    twap_length,
                    lookback,
                    invert_price: config.invert_price.unwrap_or(false),
                    decimals: config.decimals_or_default(),
                },
            )))
        }
        Some("medianizer") => {
            let children = config.medianized_feeds.as_deref().unwrap_or_default();
            debug!(
                at = "PriceFeedFactory",
                feeds = children.len(),
                "Creating median price feed"
            );
            let feeds = children
                .iter()
                .map(|child| build(&config.merge_child(child), ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PriceFeed::Median(MedianPriceFeed::new(
                feeds,
                config.compute_mean.unwrap_or(false),
            )?))
        }
        Some(other) => Err(ConfigError::UnknownFeedType(other.to_string())),
        None => Err(ConfigError::MissingField {
            feed_type: "untyped".to_string(),
            field: "type",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{MockLedger, MockNetworker, MockReserveSource};
    use serde_json::json;

    const PAIR: &str = "0xB4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc";

    fn context() -> (Arc<MockNetworker>, FeedContext) {
        let networker = Arc::new(MockNetworker::default());
        let reserve_sources: ReserveSourceBuilder = Arc::new(|_, _| {
            Ok(Arc::new(MockReserveSource::new((18, 18), Vec::new())) as Arc<dyn ReserveSource>)
        });
        let ctx = FeedContext::new(networker.clone(), Arc::new(ManualClock::new(10_000)), reserve_sources);
        (networker, ctx)
    }

    fn parse(text: &str) -> PriceFeedConfig {
        toml::from_str(text).unwrap()
    }

    fn cryptowatch() -> PriceFeedConfig {
        parse(
            r#"
            type = "cryptowatch"
            exchange = "kraken"
            pair = "ethusd"
            lookback = 7200
            min_time_between_updates = 60
            "#,
        )
    }

    #[test]
    fn test_builds_exchange_feed_with_defaults() {
        let (_, ctx) = context();
        let feed = create_price_feed(&cryptowatch(), &ctx).unwrap();
        assert_eq!(feed.name(), "exchange");
        assert_eq!(feed.lookback(), 7200);
        assert_eq!(feed.decimals(), 18);
    }

    #[test]
    fn test_missing_field_is_reported() {
        let (_, ctx) = context();
        let mut config = cryptowatch();
        config.pair = None;
        let err = create_price_feed(&config, &ctx).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "pair", .. }
        ));

        let config = parse("type = \"uniswap\"\nlookback = 100\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField {
                field: "uniswap_address",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_and_missing_type() {
        assert!(matches!(
            parse("type = \"oracle\"").validate(),
            Err(ConfigError::UnknownFeedType(t)) if t == "oracle"
        ));
        assert!(matches!(
            PriceFeedConfig::default().validate(),
            Err(ConfigError::MissingField { field: "type", .. })
        ));
    }

    #[test]
    fn test_invalid_pair_address() {
        let config = parse(
            r#"
            type = "uniswap"
            uniswap_address = "not-an-address"
            twap_length = 3600
            lookback = 7200
            "#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "price_feed.uniswap_address",
                ..
            })
        ));
    }

    #[test]
    fn test_children_inherit_parent_fields() {
        let config = parse(&format!(
            r#"
            type = "medianizer"
            lookback = 7200
            min_time_between_updates = 60
            pair = "ethusd"
            twap_length = 600

            [[medianized_feeds]]
            type = "cryptowatch"
            exchange = "kraken"

            [[medianized_feeds]]
            type = "cryptowatch"
            exchange = "coinbase-pro"
            lookback = 3600

            [[medianized_feeds]]
            type = "uniswap"
            uniswap_address = "{PAIR}"
            invert_price = true
            "#
        ));
        let feeds = config.medianized_feeds.clone().unwrap();

        let first = config.merge_child(&feeds[0]);
        assert_eq!(first.pair.as_deref(), Some("ethusd"));
        assert_eq!(first.lookback, Some(7200));
        assert_eq!(first.feed_type.as_deref(), Some("cryptowatch"));

        let second = config.merge_child(&feeds[1]);
        assert_eq!(second.lookback, Some(3600));

        let third = config.merge_child(&feeds[2]);
        assert_eq!(third.twap_length, Some(600));
        assert_eq!(third.invert_price, Some(true));

        let (_, ctx) = context();
        let PriceFeed::Median(median) = create_price_feed(&config, &ctx).unwrap() else {
            panic!("expected a median feed");
        };
        assert_eq!(median.feeds().len(), 3);
        assert_eq!(median.lookback(), 3600);
        assert_eq!(median.feeds()[2].name(), "amm");
    }

    #[test]
    fn test_type_is_not_inherited() {
        let config = parse(
            r#"
            type = "medianizer"

            [[medianized_feeds]]
            exchange = "kraken"
            "#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field: "type", .. })
        ));
    }

    #[test]
    fn test_nested_failure_propagates() {
        let (_, ctx) = context();
        let config = parse(
            r#"
            type = "medianizer"
            lookback = 7200
            min_time_between_updates = 60

            [[medianized_feeds]]
            type = "cryptowatch"
            exchange = "kraken"
            pair = "ethusd"

            [[medianized_feeds]]
            type = "medianizer"

            [[medianized_feeds.medianized_feeds]]
            type = "cryptowatch"
            exchange = "kraken"
            "#,
        );
        let err = create_price_feed(&config, &ctx).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "pair", .. }));
    }

    #[test]
    fn test_empty_medianizer() {
        assert!(matches!(
            parse("type = \"medianizer\"").validate(),
            Err(ConfigError::EmptyMedianizer)
        ));
        assert!(matches!(
            parse("type = \"medianizer\"\nmedianized_feeds = []").validate(),
            Err(ConfigError::EmptyMedianizer)
        ));
    }

    #[test]
    fn test_self_referencing_medianizer_is_bounded() {
        // A nested medianizer without its own list inherits the parent's
        let config = parse(
            r#"
            type = "medianizer"

            [[medianized_feeds]]
            type = "medianizer"
            "#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::TooDeep(_))));
    }

    #[test]
    fn test_default_reference_feed_builds() {
        let (_, ctx) = context();
        let config = reference_feed_config("ETH/BTC", None).unwrap();
        let PriceFeed::Median(median) = create_price_feed(&config, &ctx).unwrap() else {
            panic!("expected a median feed");
        };
        assert_eq!(median.feeds().len(), 3);
        assert!(median.feeds().iter().all(|feed| feed.name() == "exchange"));
        assert_eq!(median.lookback(), 7200);
    }

    #[test]
    fn test_user_config_overlays_default() {
        let user = parse(
            r#"
            api_key = "key"
            lookback = 3600
            "#,
        );
        let config = reference_feed_config("ETH/BTC", Some(&user)).unwrap();
        assert_eq!(config.feed_type.as_deref(), Some("medianizer"));
        assert_eq!(config.pair.as_deref(), Some("ethbtc"));
        assert_eq!(config.lookback, Some(3600));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.medianized_feeds.as_ref().map(Vec::len), Some(3));

        // A typed user feed takes over from the built-in one
        let config = reference_feed_config("ETH/BTC", Some(&cryptowatch())).unwrap();
        assert_eq!(config.feed_type.as_deref(), Some("cryptowatch"));
        assert_eq!(config.exchange.as_deref(), Some("kraken"));
        let (_, ctx) = context();
        assert_eq!(create_price_feed(&config, &ctx).unwrap().name(), "exchange");
    }

    #[test]
    fn test_unknown_identifier_needs_config() {
        assert!(matches!(
            reference_feed_config("GOLD/USD", None),
            Err(ConfigError::NoPriceFeed(id)) if id == "GOLD/USD"
        ));
        let config = reference_feed_config("GOLD/USD", Some(&cryptowatch())).unwrap();
        assert_eq!(config, cryptowatch());
    }

    #[test]
    fn test_amm_feed_defaults() {
        let pair = Address::from_str(PAIR).unwrap();
        let config = amm_feed_config(pair, true, None);
        assert_eq!(config.twap_length, Some(2));
        assert_eq!(config.lookback, Some(7200));
        assert_eq!(config.invert_price, Some(true));
        assert_eq!(config.pair_address().unwrap(), pair);

        let user = parse("twap_length = 3600
invert_price = false
");
        let config = amm_feed_config(pair, true, Some(&user));
        assert_eq!(config.twap_length, Some(3600));
        assert_eq!(config.invert_price, Some(false));

        let (_, ctx) = context();
        assert_eq!(create_price_feed(&config, &ctx).unwrap().name(), "amm");
    }

    #[tokio::test]
    async fn test_resolve_from_contract_identifier() {
        let ledger = MockLedger::new(Address::repeat_byte(0xaa));
        let config = resolve_price_feed_config(&ledger, None, None).await.unwrap();
        assert_eq!(config, default_reference_feed("ETH/BTC").unwrap());

        ledger.state.lock().identifier = "GOLD/USD".to_string();
        let err = resolve_price_feed_config(&ledger, None, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NoPriceFeed(_))
        ));
        let config = resolve_price_feed_config(&ledger, Some(&cryptowatch()), None)
            .await
            .unwrap();
        assert_eq!(config, cryptowatch());
    }

    #[tokio::test]
    async fn test_resolve_amm_pair_from_tokens() {
        let ledger = MockLedger::new(Address::repeat_byte(0xaa));
        let tokens = ledger.state.lock().tokens;
        let user = parse("type = \"uniswap\"\ntwap_length = 600\n");

        let config = resolve_price_feed_config(&ledger, Some(&user), None).await.unwrap();
        let (pair, inverted) = uniswap_v2_pair(tokens.synthetic, tokens.collateral);
        assert_eq!(config.pair_address().unwrap(), pair);
        // Synthetic 0x5e.. sorts before collateral 0xc0.., so it is token0
        assert!(!inverted);
        assert_eq!(config.invert_price, Some(false));
        assert_eq!(config.twap_length, Some(600));
        assert_eq!(config.lookback, Some(7200));

        let manual = Address::from_str(PAIR).unwrap();
        let config = resolve_price_feed_config(&ledger, Some(&user), Some(manual))
            .await
            .unwrap();
        assert_eq!(config.pair_address().unwrap(), manual);
    }

    #[tokio::test]
    async fn test_built_tree_updates() {
        let (networker, ctx) = context();
        networker.respond(
            "/ohlc",
            json!({"result": {"60": [[9960, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0]]}}),
        );
        networker.respond("/price", json!({"result": {"price": 2.5}}));

        let config = parse(
            r#"
            type = "medianizer"
            lookback = 120
            min_time_between_updates = 60
            pair = "ethusd"

            [[medianized_feeds]]
            type = "cryptowatch"
            exchange = "kraken"

            [[medianized_feeds]]
            type = "cryptowatch"
            exchange = "binance"
            "#,
        );
        let feed = create_price_feed(&config, &ctx).unwrap();
        assert_eq!(feed.current_price(), None);

        feed.update().await.unwrap();
        assert_eq!(
            feed.current_price(),
            Some(crate::fixed_point::FixedPoint::parse("2.5", 18).unwrap())
        );
        assert_eq!(feed.last_update_time(), Some(10_000));
        assert_eq!(networker.requested().len(), 4);
    }
}
