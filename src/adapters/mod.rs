// Adapters Module - One ProtocolAdapter per router generation

pub mod uniswap_v3;
pub mod uniswap_v4;

pub use uniswap_v3::{UniswapV3Adapter, V3AdapterConfig};
pub use uniswap_v4::{UniswapV4Adapter, V4AdapterConfig};
