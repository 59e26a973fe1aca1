//! # MIG Router SDK
//!
//! A Rust library for quoting and executing token swaps across Uniswap V4 and
//! Uniswap V3 on Ethereum mainnet. The SDK owns the full trade pipeline:
//! pool discovery, on-chain quoting, route selection, and transaction
//! construction with approval handling.
//!
//! ## Overview
//!
//! The SDK separates protocol plumbing from trade policy. It focuses on:
//!
//! - **Discovery**: Fee-tier aware pool lookup through factory and state-view
//!   contracts, batched over Multicall3
//! - **Quoting**: Quoter-contract pricing with a spot-price fallback that is
//!   always flagged as approximate
//! - **Routing**: Version fallback (V4 before V3) plus multi-hop candidate
//!   search with a configurable scoring model
//! - **Execution**: Universal Router and SwapRouter calldata, Permit2 and
//!   ERC-20 approval plans, simulation, and retry of transient failures
//!
//! ## Architecture
//!
//! ### Protocol Layer
//! [`adapters`] implements one [`protocol::ProtocolAdapter`] per Uniswap
//! version. Adapters translate between the unified pool and route types and
//! each protocol's contracts.
//!
//! ### Trade Layer
//! [`router::TradeRouter`] drives quote calculation with debouncing and
//! supersession, [`pathfinder::PathFinder`] enumerates and scores candidate
//! routes, and [`execution::TradeExecutor`] turns a chosen route into signed
//! transactions.
//!
//! ### Infrastructure
//! Batched RPC through [`multicall`], tick math in [`v3_math`], and raw
//! calldata and revert decoding in [`encoding`].

// Core Types
/// Pool descriptors, fee tiers, and token pairs
pub mod pools;
/// Token metadata model and on-chain resolution
pub mod tokens;
/// Protocol adapter trait and shared trade types
pub mod protocol;
/// Error taxonomy for the whole trade pipeline
pub mod errors;

// Protocol Adapters
/// Uniswap V3 and V4 adapter implementations
pub mod adapters;

// Trade Layer
/// Quote math, amount parsing, and route assembly
pub mod quote;
/// Trade calculation driver with debounce and supersession
pub mod router;
/// Multi-route candidate search and scoring
pub mod pathfinder;
/// Swap submission, approvals, simulation, and retries
pub mod execution;

// Utilities
/// Multicall batch RPC utilities
pub mod multicall;
/// Uniswap V3 math utilities
pub mod v3_math;
/// Calldata encoding and revert decoding
pub mod encoding;

// Contracts
/// Smart contract bindings
pub mod contracts;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use adapters::{UniswapV3Adapter, UniswapV4Adapter};
pub use errors::TradeError;
pub use execution::TradeExecutor;
pub use pathfinder::PathFinder;
pub use pools::{FeeTier, PoolDescriptor, ProtocolVersion, TokenPair, TradeDirection};
pub use protocol::{ProtocolAdapter, TradeRoute};
pub use router::{TradeRouter, TradeState};
pub use settings::Settings;
pub use tokens::Token;
