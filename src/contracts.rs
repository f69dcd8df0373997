//! Contract Definitions
//!
//! Solidity interfaces read by the backfill, defined with alloy's `sol!`
//! macro. Annotated with `#[sol(rpc)]` so contract instances can make calls
//! through any alloy Provider.
//!
//! All Uniswap V2 forks (SushiSwap, PancakeSwap, Dfyn) share these ABIs.

use alloy::sol;

// ── ERC20 ─────────────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function symbol() external view returns (string);
        function name() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

// ── Uniswap V2 ───────────────────────────────────────────────────────

sol! {
    #[sol(rpc)]
    interface IUniswapV2Factory {
        function allPairs(uint256) external view returns (address pair);
        function allPairsLength() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        event Swap(
            address indexed sender,
            uint256 amount0In,
            uint256 amount1In,
            uint256 amount0Out,
            uint256 amount1Out,
            address indexed to
        );

        function token0() external view returns (address);
        function token1() external view returns (address);
    }
}
