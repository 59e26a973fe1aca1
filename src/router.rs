//! Trade routing core: metadata resolution, version fallback, and the
//! supersession rules for re-entrant calculations.
//!
//! The router owns no network plumbing of its own. It validates input
//! locally, resolves token metadata, then walks its adapters in preference
//! order (newest generation first) until one produces a priced route.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use ethers::types::U256;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tracing::{info_span, instrument, Instrument};

use crate::errors::TradeError;
use crate::pools::{FeeTier, PoolDescriptor, TokenPair, TradeDirection};
use crate::protocol::{ProtocolAdapter, TradeRoute};
use crate::quote::{assemble_route, parse_amount, validate_amount_text, DEFAULT_SLIPPAGE_BPS};
use crate::tokens::{parse_token_address, Token, TokenMetadataSource};

/// What the UI layer sees. Snapshots are immutable; the cell swaps whole
/// states rather than mutating in place.
#[derive(Debug, Clone)]
pub enum TradeState {
    Idle,
    Calculating { generation: u64 },
    Ready(TradeRoute),
    Failed(TradeError),
}

impl TradeState {
    pub fn is_calculating(&self) -> bool {
        matches!(self, TradeState::Calculating { .. })
    }

    pub fn route(&self) -> Option<&TradeRoute> {
        match self {
            TradeState::Ready(route) => Some(route),
            _ => None,
        }
    }
}

/// Lock-free holder of the latest trade state plus the generation counter
/// that implements latest-wins supersession. Readers never block writers.
pub struct TradeStateCell {
    state: ArcSwap<TradeState>,
    generation: AtomicU64,
}

impl Default for TradeStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeStateCell {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(TradeState::Idle),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<TradeState> {
        self.state.load_full()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Clears back to idle. Bumps the generation so anything still in
    /// flight lands as stale.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.store(Arc::new(TradeState::Idle));
    }

    /// Marks a new calculation as the latest and returns its generation.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .store(Arc::new(TradeState::Calculating { generation }));
        generation
    }

    /// Publishes a result if it still belongs to the latest calculation.
    /// Stale results are dropped and `false` is returned.
    pub fn complete(&self, generation: u64, outcome: &Result<TradeRoute, TradeError>) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let next = match outcome {
            Ok(route) => TradeState::Ready(route.clone()),
            Err(error) => TradeState::Failed(error.clone()),
        };
        self.state.store(Arc::new(next));
        true
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub slippage_bps: u32,
    /// Quiet period between an input change and the on-chain lookup it
    /// triggers.
    pub debounce: Duration,
    /// Whether a spot-price approximation may be presented (flagged) when
    /// no version's quoter works but a pool exists.
    pub allow_approximate: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            debounce: Duration::from_millis(300),
            allow_approximate: true,
        }
    }
}

/// Version-fallback orchestrator. Adapters are tried in the order given,
/// so the caller's list encodes the protocol preference.
pub struct TradeRouter {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    token_source: Arc<dyn TokenMetadataSource>,
    native: Token,
    config: RouterConfig,
    state: Arc<TradeStateCell>,
    requests: AtomicU64,
}

impl TradeRouter {
    pub fn new(
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
        token_source: Arc<dyn TokenMetadataSource>,
        native: Token,
        config: RouterConfig,
    ) -> Self {
        Self {
            adapters,
            token_source,
            native,
            config,
            state: Arc::new(TradeStateCell::new()),
            requests: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> Arc<TradeState> {
        self.state.snapshot()
    }

    pub fn state_cell(&self) -> Arc<TradeStateCell> {
        Arc::clone(&self.state)
    }

    pub fn reset(&self) {
        self.state.reset();
    }

    /// Resolves, validates and prices a trade. Pure request/response; the
    /// tracked variant layers the UI state machine on top.
    ///
    /// Validation happens strictly before any network call: a malformed
    /// address, a self-pair, or a non-positive amount never reaches an
    /// adapter.
    #[instrument(
        skip_all,
        fields(token = %token_address, amount = %amount, direction = %direction)
    )]
    pub async fn calculate_trade(
        &self,
        token_address: &str,
        amount: &str,
        direction: TradeDirection,
    ) -> Result<TradeRoute, TradeError> {
        let address = parse_token_address(token_address)?;
        if address == self.native.address {
            return Err(TradeError::InvalidInput(format!(
                "cannot trade {} against itself",
                self.native.symbol
            )));
        }
        validate_amount_text(amount)?;

        // Metadata failure is terminal for the calculation, not a fallback
        // trigger.
        let token = self.token_source.resolve(address).await?;

        let (input, output) = match direction {
            TradeDirection::Buy => (self.native.clone(), token.clone()),
            TradeDirection::Sell => (token.clone(), self.native.clone()),
        };
        let pair = TokenPair::new(input.clone(), output.clone())?;
        let amount_in = parse_amount(amount, input.decimals)?;

        info!(
            "Calculating {} {} of {} ({} adapters)",
            direction,
            amount,
            token.symbol,
            self.adapters.len()
        );
        self.price_through_adapters(&pair, &input, &output, direction, amount_in, &token)
            .await
    }

    async fn price_through_adapters(
        &self,
        pair: &TokenPair,
        input: &Token,
        output: &Token,
        direction: TradeDirection,
        amount_in: U256,
        token: &Token,
    ) -> Result<TradeRoute, TradeError> {
        let mut attempted: Vec<String> = Vec::new();
        let mut degraded: Option<(Arc<dyn ProtocolAdapter>, PoolDescriptor, TradeError)> = None;
        let mut network_error: Option<TradeError> = None;

        for adapter in &self.adapters {
            let version = adapter.version();
            attempted.push(version.to_string());

            let pool = match adapter.find_pool(pair, &FeeTier::ALL).await {
                Ok(Some(pool)) => pool,
                Ok(None) => {
                    debug!("{version} has no pool for {}", pair.describe());
                    continue;
                }
                Err(error) => {
                    warn!("{version} discovery failed: {error}");
                    network_error = Some(error);
                    continue;
                }
            };

            match adapter.quote(&pool, input, amount_in).await {
                Ok(quote) => {
                    return assemble_route(
                        &pool,
                        input,
                        output,
                        direction,
                        amount_in,
                        &quote,
                        self.config.slippage_bps,
                    );
                }
                Err(error @ TradeError::QuoteUnavailable { .. }) => {
                    warn!("{version} quoter unusable ({error}), trying next version");
                    if degraded.is_none() {
                        degraded = Some((Arc::clone(adapter), pool, error));
                    }
                }
                Err(error) if error.is_retryable() => {
                    warn!("{version} quote hit a network problem: {error}");
                    network_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        // Every version exhausted. Prefer a flagged approximation over a
        // dead end when a pool was actually found.
        if let Some((adapter, pool, quote_error)) = degraded {
            if self.config.allow_approximate {
                warn!(
                    "All quoters failed for {}; presenting spot approximation from {}",
                    pair.describe(),
                    pool.describe()
                );
                let quote = adapter.spot_quote(&pool, input, amount_in)?;
                return assemble_route(
                    &pool,
                    input,
                    output,
                    direction,
                    amount_in,
                    &quote,
                    self.config.slippage_bps,
                );
            }
            return Err(quote_error);
        }
        if let Some(error) = network_error {
            return Err(error);
        }
        Err(TradeError::NoLiquidity {
            token: token.symbol.clone(),
            versions: attempted,
        })
    }

    /// `calculate_trade` wrapped in the state machine: marks Calculating,
    /// runs, and publishes the outcome unless a newer calculation started
    /// in the meantime.
    pub async fn calculate_trade_tracked(
        &self,
        token_address: &str,
        amount: &str,
        direction: TradeDirection,
    ) -> Result<TradeRoute, TradeError> {
        let generation = self.state.begin();
        let outcome = self
            .calculate_trade(token_address, amount, direction)
            .await;
        if !self.state.complete(generation, &outcome) {
            debug!("calculation {generation} superseded, result dropped");
        }
        outcome
    }

    /// Debounced entry point for keystroke-driven input. Each call
    /// supersedes any still-waiting one; only the last request in a burst
    /// actually reaches the network.
    pub fn schedule_calculation(
        self: Arc<Self>,
        token_address: String,
        amount: String,
        direction: TradeDirection,
    ) -> JoinHandle<()> {
        let request = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("scheduled_calculation", request);
        tokio::spawn(
            async move {
                tokio::time::sleep(self.config.debounce).await;
                if self.requests.load(Ordering::SeqCst) != request {
                    debug!("request {request} superseded during debounce");
                    return;
                }
                let _ = self
                    .calculate_trade_tracked(&token_address, &amount, direction)
                    .await;
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{PoolId, ProtocolVersion};
    use crate::protocol::{PoolQuote, PreparedCall, SwapCallParams};
    use crate::tokens::StaticTokenSource;
    use crate::v3_math::Q96;
    use async_trait::async_trait;
    use chrono::Utc;
    use ethers::types::Address;
    use std::sync::atomic::AtomicUsize;

    const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    const TKN: &str = "0xF0f0f0F0F0f0F0F0f0f0f0F0F0F0f0F0F0f0F0F0";

    fn native() -> Token {
        Token::native(1, WETH.parse().unwrap())
    }

    fn tkn() -> Token {
        Token::erc20(1, TKN.parse().unwrap(), 18, "TKN", "Test Token")
    }

    fn pool(version: ProtocolVersion, tier: FeeTier, liquidity: u128) -> PoolDescriptor {
        let (t0, t1) = if native().address <= tkn().address {
            (native(), tkn())
        } else {
            (tkn(), native())
        };
        PoolDescriptor {
            version,
            id: PoolId::Address(Address::from_low_u64_be(9)),
            token0: t0,
            token1: t1,
            fee_tier: tier,
            liquidity,
            sqrt_price_x96: Q96,
            tick: 0,
        }
    }

    struct MockAdapter {
        version: ProtocolVersion,
        pool: Option<PoolDescriptor>,
        quote_error: Option<TradeError>,
        find_calls: AtomicUsize,
    }

    impl MockAdapter {
        fn new(version: ProtocolVersion, pool: Option<PoolDescriptor>) -> Self {
            Self {
                version,
                pool,
                quote_error: None,
                find_calls: AtomicUsize::new(0),
            }
        }

        fn with_quote_error(mut self, error: TradeError) -> Self {
            self.quote_error = Some(error);
            self
        }
    }

    #[async_trait]
    impl ProtocolAdapter for MockAdapter {
        fn version(&self) -> ProtocolVersion {
            self.version
        }

        async fn find_pool(
            &self,
            _pair: &TokenPair,
            _tiers: &[FeeTier],
        ) -> Result<Option<PoolDescriptor>, TradeError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pool.clone())
        }

        async fn quote(
            &self,
            _pool: &PoolDescriptor,
            _input: &Token,
            amount_in: U256,
        ) -> Result<PoolQuote, TradeError> {
            if let Some(error) = &self.quote_error {
                return Err(error.clone());
            }
            Ok(PoolQuote {
                amount_out: amount_in * 99u64 / 100u64,
                sqrt_price_after: None,
                gas_estimate: None,
                approximate: false,
            })
        }

        fn spot_quote(
            &self,
            _pool: &PoolDescriptor,
            _input: &Token,
            amount_in: U256,
        ) -> Result<PoolQuote, TradeError> {
            Ok(PoolQuote {
                amount_out: amount_in * 98u64 / 100u64,
                sqrt_price_after: None,
                gas_estimate: None,
                approximate: true,
            })
        }

        fn build_swap_call(
            &self,
            _route: &TradeRoute,
            _params: &SwapCallParams,
        ) -> Result<PreparedCall, TradeError> {
            Err(TradeError::InvalidInput("not used by these tests".into()))
        }
    }

    fn router_with(adapters: Vec<Arc<MockAdapter>>) -> (TradeRouter, Vec<Arc<MockAdapter>>) {
        let dyn_adapters: Vec<Arc<dyn ProtocolAdapter>> = adapters
            .iter()
            .map(|a| Arc::clone(a) as Arc<dyn ProtocolAdapter>)
            .collect();
        let source = StaticTokenSource::new().with_token(tkn());
        let router = TradeRouter::new(
            dyn_adapters,
            Arc::new(source),
            native(),
            RouterConfig {
                debounce: Duration::from_millis(300),
                ..RouterConfig::default()
            },
        );
        (router, adapters)
    }

    fn sample_route(amount_in: U256) -> TradeRoute {
        TradeRoute {
            version: ProtocolVersion::V4,
            direction: TradeDirection::Buy,
            path: vec![native(), tkn()],
            fee_tiers: vec![FeeTier::Medium],
            amount_in,
            amount_out: amount_in,
            minimum_received: amount_in,
            execution_price: 1.0,
            price_impact_pct: 0.0,
            slippage_bps: 50,
            approximate: false,
            quoted_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_cell_latest_wins() {
        let cell = TradeStateCell::new();
        let first = cell.begin();
        let second = cell.begin();
        assert!(first < second);

        // The older calculation resolves after the newer one started; its
        // result must not clobber the newer state.
        let stale = Ok(sample_route(U256::from(1u64)));
        assert!(!cell.complete(first, &stale));
        assert!(cell.snapshot().is_calculating());

        let fresh = Ok(sample_route(U256::from(2u64)));
        assert!(cell.complete(second, &fresh));
        let published = cell.snapshot();
        assert_eq!(
            published.route().map(|r| r.amount_in),
            Some(U256::from(2u64))
        );

        // Arrival order does not matter, only the generation does.
        assert!(!cell.complete(first, &stale));
        assert_eq!(
            cell.snapshot().route().map(|r| r.amount_in),
            Some(U256::from(2u64))
        );
    }

    #[test]
    fn test_state_cell_reset_invalidates_in_flight() {
        let cell = TradeStateCell::new();
        let generation = cell.begin();
        cell.reset();
        assert!(matches!(*cell.snapshot(), TradeState::Idle));
        assert!(!cell.complete(generation, &Ok(sample_route(U256::one()))));
        assert!(matches!(*cell.snapshot(), TradeState::Idle));
    }

    #[tokio::test]
    async fn test_self_pair_rejected_before_any_network_call() {
        let (router, adapters) = router_with(vec![
            Arc::new(MockAdapter::new(
                ProtocolVersion::V4,
                Some(pool(ProtocolVersion::V4, FeeTier::Medium, 1_000)),
            )),
        ]);

        let result = router.calculate_trade(WETH, "1", TradeDirection::Buy).await;
        assert!(matches!(result, Err(TradeError::InvalidInput(_))));
        assert_eq!(adapters[0].find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_before_any_network_call() {
        let (router, adapters) = router_with(vec![
            Arc::new(MockAdapter::new(ProtocolVersion::V4, None)),
        ]);

        for bad in ["0", "-1", "garbage", ""] {
            let result = router.calculate_trade(TKN, bad, TradeDirection::Buy).await;
            assert!(matches!(result, Err(TradeError::InvalidInput(_))), "{bad}");
        }
        assert_eq!(adapters[0].find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_newer_version_wins_when_both_have_pools() {
        let (router, adapters) = router_with(vec![
            Arc::new(MockAdapter::new(
                ProtocolVersion::V4,
                Some(pool(ProtocolVersion::V4, FeeTier::Medium, 7_000)),
            )),
            Arc::new(MockAdapter::new(
                ProtocolVersion::V3,
                Some(pool(ProtocolVersion::V3, FeeTier::Medium, 7_000)),
            )),
        ]);

        let route = router
            .calculate_trade(TKN, "1", TradeDirection::Buy)
            .await
            .unwrap();
        assert_eq!(route.version, ProtocolVersion::V4);
        // Fallback never reached the older version.
        assert_eq!(adapters[1].find_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_older_version() {
        let (router, adapters) = router_with(vec![
            Arc::new(MockAdapter::new(ProtocolVersion::V4, None)),
            Arc::new(MockAdapter::new(
                ProtocolVersion::V3,
                Some(pool(ProtocolVersion::V3, FeeTier::Medium, 500_000)),
            )),
        ]);

        let route = router
            .calculate_trade(TKN, "1", TradeDirection::Sell)
            .await
            .unwrap();
        assert_eq!(route.version, ProtocolVersion::V3);
        assert_eq!(route.fee_tiers, vec![FeeTier::Medium]);
        assert!(!route.approximate);
        assert_eq!(adapters[0].find_calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapters[1].find_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_missing_names_both_versions() {
        let (router, _) = router_with(vec![
            Arc::new(MockAdapter::new(ProtocolVersion::V4, None)),
            Arc::new(MockAdapter::new(ProtocolVersion::V3, None)),
        ]);

        let error = router
            .calculate_trade(TKN, "1", TradeDirection::Buy)
            .await
            .unwrap_err();
        match &error {
            TradeError::NoLiquidity { versions, .. } => {
                assert_eq!(versions.len(), 2);
            }
            other => panic!("expected NoLiquidity, got {other:?}"),
        }
        let message = error.to_string();
        assert!(message.contains("Uniswap V4"), "{message}");
        assert!(message.contains("Uniswap V3"), "{message}");
    }

    #[tokio::test]
    async fn test_unusable_quoter_falls_back_to_older_version() {
        let (router, _) = router_with(vec![
            Arc::new(
                MockAdapter::new(
                    ProtocolVersion::V4,
                    Some(pool(ProtocolVersion::V4, FeeTier::Medium, 9_000)),
                )
                .with_quote_error(TradeError::QuoteUnavailable {
                    version: ProtocolVersion::V4.to_string(),
                    reason: "quoter reverted".into(),
                }),
            ),
            Arc::new(MockAdapter::new(
                ProtocolVersion::V3,
                Some(pool(ProtocolVersion::V3, FeeTier::Low, 9_000)),
            )),
        ]);

        let route = router
            .calculate_trade(TKN, "2", TradeDirection::Buy)
            .await
            .unwrap();
        assert_eq!(route.version, ProtocolVersion::V3);
        assert!(!route.approximate);
    }

    #[tokio::test]
    async fn test_spot_approximation_is_last_resort_and_flagged() {
        let (router, _) = router_with(vec![
            Arc::new(
                MockAdapter::new(
                    ProtocolVersion::V4,
                    Some(pool(ProtocolVersion::V4, FeeTier::Medium, 9_000)),
                )
                .with_quote_error(TradeError::QuoteUnavailable {
                    version: ProtocolVersion::V4.to_string(),
                    reason: "quoter reverted".into(),
                }),
            ),
            Arc::new(MockAdapter::new(ProtocolVersion::V3, None)),
        ]);

        let route = router
            .calculate_trade(TKN, "1", TradeDirection::Buy)
            .await
            .unwrap();
        assert_eq!(route.version, ProtocolVersion::V4);
        assert!(route.approximate);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_deterministic() {
        let (router, _) = router_with(vec![
            Arc::new(MockAdapter::new(ProtocolVersion::V4, None)),
            Arc::new(MockAdapter::new(
                ProtocolVersion::V3,
                Some(pool(ProtocolVersion::V3, FeeTier::Medium, 500_000)),
            )),
        ]);

        let first = router
            .calculate_trade(TKN, "1.25", TradeDirection::Buy)
            .await
            .unwrap();
        let second = router
            .calculate_trade(TKN, "1.25", TradeDirection::Buy)
            .await
            .unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(first.amount_out, second.amount_out);
        assert_eq!(first.minimum_received, second.minimum_received);
        assert_eq!(first.execution_price, second.execution_price);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_squashes_rapid_requests() {
        let (router, adapters) = router_with(vec![Arc::new(MockAdapter::new(
            ProtocolVersion::V4,
            Some(pool(ProtocolVersion::V4, FeeTier::Medium, 9_000)),
        ))]);
        let router = Arc::new(router);

        let first = Arc::clone(&router).schedule_calculation(
            TKN.to_string(),
            "1".to_string(),
            TradeDirection::Buy,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = Arc::clone(&router).schedule_calculation(
            TKN.to_string(),
            "2".to_string(),
            TradeDirection::Buy,
        );
        tokio::time::sleep(Duration::from_millis(400)).await;

        first.await.unwrap();
        second.await.unwrap();

        // Only the second request survived the debounce window.
        assert_eq!(adapters[0].find_calls.load(Ordering::SeqCst), 1);
        let state = router.state();
        let route = state.route().expect("latest request should have landed");
        assert_eq!(route.amount_in, U256::exp10(18) * 2u64);
    }
}
