// Contracts Module - Public ABIs Only

pub mod erc20;
pub mod i_permit2;
pub mod i_state_view;
pub mod i_uniswap_v3_factory;
pub mod i_uniswap_v3_pool;
pub mod i_universal_router;
pub mod i_v4_quoter;
pub mod quoter;

// Public exports
pub use erc20::Erc20;
pub use i_permit2::IPermit2;
pub use i_state_view::IStateView;
pub use i_uniswap_v3_factory::IUniswapV3Factory;
pub use i_uniswap_v3_pool::IUniswapV3Pool;
pub use i_universal_router::IUniversalRouter;
pub use i_v4_quoter::IV4Quoter;
pub use quoter::UniswapV3Quoter;
