use ethers::prelude::*;

// V1 quoter interface. These are state-mutating functions driven through
// eth_call; the contract reverts internally and replays the result, so the
// happy path still decodes like a view call.
abigen!(
    UniswapV3Quoter,
    r#"[
        function quoteExactInputSingle(address tokenIn, address tokenOut, uint24 fee, uint256 amountIn, uint160 sqrtPriceLimitX96) external returns (uint256 amountOut)
        function quoteExactInput(bytes path, uint256 amountIn) external returns (uint256 amountOut)
    ]"#
);
