use ethers::prelude::*;

// Field widths must match the Solidity declarations exactly (uint160 price,
// int24 tick, uint128 liquidity), otherwise decoding fails silently.
abigen!(
    IUniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function liquidity() external view returns (uint128)
        function token0() external view returns (address)
        function token1() external view returns (address)
        function fee() external view returns (uint24)
        function tickSpacing() external view returns (int24)
        function feeGrowthGlobal0X128() external view returns (uint256)
        function feeGrowthGlobal1X128() external view returns (uint256)
    ]"#
);
