use ethers::prelude::*;

abigen!(
    IUniversalRouter,
    r#"[
        function execute(bytes commands, bytes[] inputs, uint256 deadline) external payable
    ]"#
);
