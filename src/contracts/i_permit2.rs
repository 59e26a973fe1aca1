use ethers::prelude::*;

// Allowance-transfer surface only. V4 routers pull ERC-20 input through
// Permit2, so sells need both the ERC-20 approval to Permit2 and this
// uint160/uint48 approval to the router.
abigen!(
    IPermit2,
    r#"[
        function allowance(address owner, address token, address spender) external view returns (uint160 amount, uint48 expiration, uint48 nonce)
        function approve(address token, address spender, uint160 amount, uint48 expiration) external
    ]"#
);
