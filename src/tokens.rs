//! Token model and on-chain metadata resolution.

use crate::contracts::Erc20;
use crate::errors::TradeError;
use crate::multicall::{Call, Multicall};
use async_trait::async_trait;
use ethers::abi::Function;
use ethers::prelude::*;
use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NATIVE_DECIMALS: u8 = 18;

/// A tradable asset.
///
/// The native coin is modeled as its wrapped ERC-20 address with
/// `is_native` set: V3 paths can then use the address unchanged while V4
/// pool keys map it to the zero currency via [`Token::v4_currency`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
    pub is_native: bool,
}

impl Token {
    pub fn native(chain_id: u64, wrapped: Address) -> Self {
        Self {
            chain_id,
            address: wrapped,
            decimals: NATIVE_DECIMALS,
            symbol: "ETH".to_string(),
            name: "Ether".to_string(),
            is_native: true,
        }
    }

    pub fn erc20(
        chain_id: u64,
        address: Address,
        decimals: u8,
        symbol: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            chain_id,
            address,
            decimals,
            symbol: symbol.into(),
            name: name.into(),
            is_native: false,
        }
    }

    /// The address V4 pool keys use for this asset: zero for native.
    pub fn v4_currency(&self) -> Address {
        if self.is_native {
            Address::zero()
        } else {
            self.address
        }
    }
}

// Identity is the (chain, address) pair. The native sentinel and its wrapped
// ERC-20 compare equal on purpose, so a wrapped-vs-native self-pair is
// caught by the same check as any other self-pair.
impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id && self.address == other.address
    }
}

impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.chain_id.hash(state);
        self.address.hash(state);
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Parses a user-supplied token address. Capitalization is ignored and the
/// `0x` prefix is optional; anything that is not 20 hex bytes is rejected
/// before any network traffic happens.
pub fn parse_token_address(input: &str) -> Result<Address, TradeError> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TradeError::InvalidInput(format!(
            "'{trimmed}' is not a valid token address"
        )));
    }

    Address::from_str(&format!("0x{}", hex_part.to_lowercase()))
        .map_err(|e| TradeError::InvalidInput(format!("'{trimmed}' is not a valid token address: {e}")))
}

/// Where token metadata comes from. Kept as a trait so calculation logic can
/// be driven without a node in tests.
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn resolve(&self, address: Address) -> Result<Token, TradeError>;
}

/// Fixed in-memory token list. Backs offline tooling and tests; also usable
/// as a pre-seeded overlay for well-known tokens.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenSource {
    tokens: std::collections::HashMap<Address, Token>,
}

impl StaticTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.tokens.insert(token.address, token);
        self
    }

    pub fn insert(&mut self, token: Token) {
        self.tokens.insert(token.address, token);
    }
}

#[async_trait]
impl TokenMetadataSource for StaticTokenSource {
    async fn resolve(&self, address: Address) -> Result<Token, TradeError> {
        self.tokens.get(&address).cloned().ok_or_else(|| {
            TradeError::InvalidInput(format!("unknown token {address:?}"))
        })
    }
}

/// Metadata resolver backed by one Multicall3 batch of
/// `decimals`/`symbol`/`name`, with an LRU cache in front. Metadata is
/// immutable in practice, so cached entries never expire.
pub struct OnchainTokenSource<M: Middleware> {
    provider: Arc<M>,
    multicall: Multicall<M>,
    chain_id: u64,
    timeout: Duration,
    cache: Mutex<LruCache<Address, Token>>,
}

impl<M: Middleware + 'static> OnchainTokenSource<M> {
    pub fn new(
        provider: Arc<M>,
        multicall: Multicall<M>,
        chain_id: u64,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(512).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            multicall,
            chain_id,
            timeout,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn fetch(&self, address: Address) -> Result<Token, TradeError> {
        let erc20 = Erc20::new(Address::zero(), self.provider.clone());
        let missing =
            || TradeError::Rpc("failed to build ERC-20 metadata calldata".to_string());

        let calls = vec![
            Call {
                target: address,
                call_data: erc20.decimals().calldata().ok_or_else(missing)?,
            },
            Call {
                target: address,
                call_data: erc20.symbol().calldata().ok_or_else(missing)?,
            },
            Call {
                target: address,
                call_data: erc20.name().calldata().ok_or_else(missing)?,
            },
        ];
        let results = self.multicall.run(calls, None).await?;
        if results.len() != 3 {
            return Err(TradeError::Rpc(
                "token metadata batch came back short".to_string(),
            ));
        }

        let abi = erc20.abi();
        let decimals = results[0]
            .as_ref()
            .zip(abi.function("decimals").ok())
            .and_then(|(raw, f)| decode_uint8_output(f, raw));
        let symbol = results[1]
            .as_ref()
            .zip(abi.function("symbol").ok())
            .and_then(|(raw, f)| decode_string_output(f, raw));
        let name = results[2]
            .as_ref()
            .zip(abi.function("name").ok())
            .and_then(|(raw, f)| decode_string_output(f, raw));

        // decimals() is the one call a usable token must answer; symbol and
        // name fall back to an address label.
        let Some(decimals) = decimals else {
            return Err(TradeError::InvalidInput(format!(
                "{address:?} does not respond to decimals(); not an ERC-20 token"
            )));
        };

        let symbol = symbol.unwrap_or_else(|| short_address_label(address));
        let name = name.unwrap_or_else(|| symbol.clone());
        debug!("Resolved token {address:?} as {symbol} ({decimals} decimals)");

        Ok(Token::erc20(self.chain_id, address, decimals, symbol, name))
    }
}

#[async_trait]
impl<M: Middleware + 'static> TokenMetadataSource for OnchainTokenSource<M> {
    async fn resolve(&self, address: Address) -> Result<Token, TradeError> {
        if let Some(hit) = self
            .cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&address).cloned())
        {
            return Ok(hit);
        }

        let token = tokio::time::timeout(self.timeout, self.fetch(address))
            .await
            .map_err(|_| {
                TradeError::NetworkTransient(format!(
                    "token metadata lookup for {address:?} timed out after {:?}",
                    self.timeout
                ))
            })??;

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(address, token.clone());
        }
        Ok(token)
    }
}

fn decode_uint8_output(function: &Function, raw: &Bytes) -> Option<u8> {
    function
        .decode_output(raw)
        .ok()
        .and_then(|tokens| tokens.into_iter().next())
        .and_then(|t| t.into_uint())
        .and_then(|u| u.try_into().ok())
}

/// Decodes a string return, tolerating the pre-standard tokens (MKR and
/// friends) that declare `symbol()` as `bytes32`.
fn decode_string_output(function: &Function, raw: &Bytes) -> Option<String> {
    let decoded = function
        .decode_output(raw)
        .ok()
        .and_then(|tokens| tokens.into_iter().next())
        .and_then(|t| t.into_string());

    let text = match decoded {
        Some(s) => s,
        None if raw.len() == 32 => {
            let end = raw.iter().position(|b| *b == 0).unwrap_or(32);
            String::from_utf8(raw[..end].to_vec()).ok()?
        }
        None => return None,
    };

    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn short_address_label(address: Address) -> String {
    let hex = format!("{address:#x}");
    format!("{}..{}", &hex[..6], &hex[hex.len() - 4..])
}
