use ethers::prelude::*;

// V4 keeps all pool state inside the PoolManager singleton; StateView is the
// canonical read-only lens over it, keyed by pool id.
abigen!(
    IStateView,
    r#"[
        function getSlot0(bytes32 poolId) external view returns (uint160 sqrtPriceX96, int24 tick, uint24 protocolFee, uint24 lpFee)
        function getLiquidity(bytes32 poolId) external view returns (uint128 liquidity)
    ]"#
);
