//! # Route Probe
//!
//! Read-only CLI for exercising the router SDK against a live RPC endpoint.
//!
//! ## Overview
//!
//! Three subcommands, none of which send transactions:
//! - `pools`: list discovered pools for a token against the native coin
//! - `quote`: run the full trade calculation (V4 first, V3 fallback)
//! - `routes`: enumerate and score direct plus two-hop route candidates
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin route_probe -- quote --token 0xA0b8...eB48 --amount 1.5
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use ethers::prelude::{Http, Provider};
use mig_router_sdk::{
    adapters::{UniswapV3Adapter, UniswapV4Adapter},
    multicall::Multicall,
    pathfinder::{select_best, GasModel, PathFinder, ScoringWeights},
    pools::{FeeTier, TokenPair, TradeDirection},
    protocol::ProtocolAdapter,
    quote::{format_amount, parse_amount},
    router::{RouterConfig, TradeRouter},
    settings::Settings,
    tokens::{parse_token_address, OnchainTokenSource, Token, TokenMetadataSource},
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "route_probe")]
#[command(about = "Read-only probe for the MIG router SDK", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pools for a token against the native coin, per version and tier
    Pools {
        /// ERC-20 token address (0x-prefixed)
        #[arg(long)]
        token: String,
    },
    /// Calculate a trade the way the UI would (quoter first, flagged spot fallback)
    Quote {
        /// ERC-20 token address (0x-prefixed)
        #[arg(long)]
        token: String,
        /// Human-readable amount of the input asset, e.g. "1.5"
        #[arg(long)]
        amount: String,
        /// Sell the token for the native coin instead of buying it
        #[arg(long)]
        sell: bool,
        /// Print the priced route as JSON instead of the annotated view
        #[arg(long)]
        json: bool,
    },
    /// Enumerate direct and two-hop candidates and show their scores
    Routes {
        /// ERC-20 token address (0x-prefixed)
        #[arg(long)]
        token: String,
        /// Human-readable amount of the input asset
        #[arg(long)]
        amount: String,
        /// Maximum number of hops to consider
        #[arg(long, default_value_t = 2)]
        max_hops: usize,
        /// Sell the token for the native coin instead of buying it
        #[arg(long)]
        sell: bool,
    },
}

struct Stack {
    v3: Arc<UniswapV3Adapter<Provider<Http>>>,
    v4: Arc<UniswapV4Adapter<Provider<Http>>>,
    token_source: Arc<OnchainTokenSource<Provider<Http>>>,
    native: Token,
    settings: Settings,
}

impl Stack {
    fn adapters(&self) -> Vec<Arc<dyn ProtocolAdapter>> {
        vec![
            Arc::clone(&self.v4) as Arc<dyn ProtocolAdapter>,
            Arc::clone(&self.v3) as Arc<dyn ProtocolAdapter>,
        ]
    }

    fn router(&self) -> TradeRouter {
        TradeRouter::new(
            self.adapters(),
            Arc::clone(&self.token_source) as Arc<dyn TokenMetadataSource>,
            self.native.clone(),
            RouterConfig {
                slippage_bps: self.settings.trade.slippage_bps,
                debounce: self.settings.debounce(),
                allow_approximate: self.settings.trade.allow_approximate,
            },
        )
    }
}

fn build_stack(settings: Settings) -> anyhow::Result<Stack> {
    let contracts = settings.contracts.parse()?;
    let provider = Arc::new(Provider::<Http>::try_from(settings.rpc.http_url.as_str())?);
    let multicall = Multicall::new(
        Arc::clone(&provider),
        contracts.multicall,
        settings.rpc.batch_size,
    )
    .with_timeout(settings.request_timeout());

    let v3 = Arc::new(UniswapV3Adapter::new(
        Arc::clone(&provider),
        multicall.clone(),
        settings.v3_adapter_config(&contracts),
    ));
    let v4 = Arc::new(UniswapV4Adapter::new(
        Arc::clone(&provider),
        multicall.clone(),
        settings.v4_adapter_config(&contracts),
    ));
    let token_source = Arc::new(OnchainTokenSource::new(
        provider,
        multicall,
        settings.chain.chain_id,
        settings.request_timeout(),
    ));
    let native = Token::native(settings.chain.chain_id, contracts.weth);

    Ok(Stack {
        v3,
        v4,
        token_source,
        native,
        settings,
    })
}

async fn run_pools(stack: &Stack, token: &str) -> anyhow::Result<()> {
    let address = parse_token_address(token)?;
    let resolved = stack.token_source.resolve(address).await?;
    let pair = TokenPair::new(stack.native.clone(), resolved.clone())?;

    println!(
        "Pools for {} ({})",
        resolved.symbol.bold(),
        format!("{:?}", address).dimmed()
    );

    for adapter in stack.adapters() {
        println!("\n{}", adapter.version().to_string().cyan().bold());
        let mut found = 0usize;
        for tier in FeeTier::ALL {
            match adapter.find_pool(&pair, std::slice::from_ref(&tier)).await {
                Ok(Some(pool)) => {
                    found += 1;
                    println!(
                        "  {} {}  mid price {:.6} {} per {}",
                        "✅".green(),
                        pool.describe(),
                        pool.mid_price(&stack.native),
                        resolved.symbol,
                        stack.native.symbol
                    );
                }
                Ok(None) => println!("  ▫️ {}: no initialized pool", tier),
                Err(e) => println!("  {} {}: {}", "⚠️".yellow(), tier, e),
            }
        }
        if found == 0 {
            println!("  no usable liquidity on this version");
        }
    }
    Ok(())
}

async fn run_quote(
    stack: &Stack,
    token: &str,
    amount: &str,
    sell: bool,
    json: bool,
) -> anyhow::Result<()> {
    let direction = if sell {
        TradeDirection::Sell
    } else {
        TradeDirection::Buy
    };
    let router = stack.router();
    let route = router.calculate_trade(token, amount, direction).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&route)?);
        return Ok(());
    }

    let badge = if route.approximate {
        "~ approximate (spot price, unverified by quoter)".yellow()
    } else {
        "✅ quoter-verified".green()
    };
    println!("{}", route.describe().bold());
    println!("  {}", badge);
    println!(
        "  in:  {} {}",
        format_amount(route.amount_in, route.input().decimals),
        route.input().symbol
    );
    println!(
        "  out: {} {}",
        format_amount(route.amount_out, route.output().decimals),
        route.output().symbol
    );
    println!("  execution price: {}", route.execution_price);
    println!("  price impact: {:.4}%", route.price_impact_pct);
    println!(
        "  minimum received ({} bps slippage): {} {}",
        route.slippage_bps,
        format_amount(route.minimum_received, route.output().decimals),
        route.output().symbol
    );
    println!("  quoted at: {}", route.quoted_at);
    Ok(())
}

async fn run_routes(
    stack: &Stack,
    token: &str,
    amount: &str,
    max_hops: usize,
    sell: bool,
) -> anyhow::Result<()> {
    let address = parse_token_address(token)?;
    let resolved = stack.token_source.resolve(address).await?;
    let (token_in, token_out) = if sell {
        (resolved.clone(), stack.native.clone())
    } else {
        (stack.native.clone(), resolved.clone())
    };
    let amount_in = parse_amount(amount, token_in.decimals)?;

    let mut intermediates = Vec::new();
    for address in stack.settings.intermediate_addresses()? {
        match stack.token_source.resolve(address).await {
            Ok(t) => intermediates.push(t),
            Err(e) => log::warn!("skipping intermediate {:?}: {}", address, e),
        }
    }

    let finder = PathFinder::new(
        Arc::clone(&stack.v3),
        intermediates,
        ScoringWeights {
            output: stack.settings.routing.weight_output,
            impact: stack.settings.routing.weight_impact,
            gas: stack.settings.routing.weight_gas,
        },
        GasModel {
            base_gas: stack.settings.routing.base_gas,
            per_hop_gas: stack.settings.routing.per_hop_gas,
            gas_price_gwei: stack.settings.routing.gas_price_gwei,
        },
    );

    let candidates = finder
        .find_all_routes(&token_in, &token_out, amount_in, max_hops)
        .await?;
    if candidates.is_empty() {
        println!("{}", "no priceable route candidates".yellow());
        return Ok(());
    }

    let best = select_best(&candidates);
    println!(
        "{} candidates for {} -> {}\n",
        candidates.len(),
        token_in.symbol.bold(),
        token_out.symbol.bold()
    );
    for candidate in &candidates {
        let marker = match best {
            Some(b) if std::ptr::eq(b, candidate) => "★".green().bold(),
            _ => " ".normal(),
        };
        println!(
            "{} {}  out {} {}  impact {:.4}%  gas ~{:.6} {}",
            marker,
            candidate.describe(),
            format_amount(candidate.amount_out, token_out.decimals),
            token_out.symbol,
            candidate.price_impact_pct,
            candidate.gas_cost_native,
            stack.native.symbol
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // 1. Load settings, then wire the logger to the configured level
    let settings = Settings::new()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log.level.clone()),
    )
    .init();

    // Span output is JSON for log pipelines; log macros stay on env_logger.
    #[cfg(feature = "observability")]
    tracing_subscriber::fmt().json().init();

    let cli = Cli::parse();

    // 2. Build providers and adapters
    let stack = build_stack(settings)?;
    println!(
        "✅ Connected to chain {} via {}\n",
        stack.settings.chain.chain_id, stack.settings.rpc.http_url
    );

    // 3. Dispatch
    match &cli.command {
        Commands::Pools { token } => run_pools(&stack, token).await?,
        Commands::Quote {
            token,
            amount,
            sell,
            json,
        } => run_quote(&stack, token, amount, *sell, *json).await?,
        Commands::Routes {
            token,
            amount,
            max_hops,
            sell,
        } => run_routes(&stack, token, amount, *max_hops, *sell).await?,
    }

    Ok(())
}
