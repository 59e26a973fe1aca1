use ethers::prelude::*;

// Declaring the structs gives the binding the same selector as the canonical
// tuple encoding while generating typed PoolKey / QuoteExactSingleParams
// argument structs instead of anonymous nested tuples.
abigen!(
    IV4Quoter,
    r#"[
        struct PoolKey { address currency0; address currency1; uint24 fee; int24 tickSpacing; address hooks; }
        struct QuoteExactSingleParams { PoolKey poolKey; bool zeroForOne; uint128 exactAmount; bytes hookData; }
        function quoteExactInputSingle(QuoteExactSingleParams params) external returns (uint256 amountOut, uint256 gasEstimate)
    ]"#
);
