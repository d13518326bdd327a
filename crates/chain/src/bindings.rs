//! Contract bindings for the financial contract, the AMM pair and ERC20 metadata.
//!
//! ```rust,ignore
//! use risk_agent_chain::bindings::IExpiringMultiParty;
//!
//! let emp = IExpiringMultiParty::new(address, provider);
//! let now = emp.getCurrentTime().call().await?._0;
//! ```

use alloy::sol;

sol! {
    /// Fixed-point wrapper used across the financial contract ABI.
    #[derive(Debug, PartialEq, Eq)]
    struct Unsigned {
        uint256 rawValue;
    }

    /// Liquidation record as returned by `getLiquidations`.
    #[derive(Debug)]
    struct RawLiquidation {
        address sponsor;
        address liquidator;
        uint8 state;
        uint256 liquidationTime;
        Unsigned tokensOutstanding;
        Unsigned lockedCollateral;
        Unsigned liquidatedCollateral;
        Unsigned rawUnitCollateral;
        address disputer;
        Unsigned settlementPrice;
        Unsigned finalFee;
    }

    #[sol(rpc)]
    interface IExpiringMultiParty {
        event NewSponsor(address indexed sponsor);

        event LiquidationCreated(
            address indexed sponsor,
            address indexed liquidator,
            uint256 indexed liquidationId,
            uint256 tokensOutstanding,
            uint256 lockedCollateral,
            uint256 liquidatedCollateral,
            uint256 liquidationTime
        );

        event LiquidationDisputed(
            address indexed sponsor,
            address indexed liquidator,
            address indexed disputer,
            uint256 liquidationId,
            uint256 disputeBondAmount
        );

        event DisputeSettled(
            address indexed caller,
            address indexed sponsor,
            address indexed liquidator,
            address disputer,
            uint256 liquidationId,
            bool disputeSucceeded
        );

        event LiquidationWithdrawn(
            address indexed caller,
            uint256 paidToLiquidator,
            uint256 paidToDisputer,
            uint256 paidToSponsor,
            uint8 indexed liquidationStatus,
            uint256 settlementPrice
        );

        function positions(address sponsor) external view returns (
            Unsigned memory tokensOutstanding,
            uint256 withdrawalRequestPassTimestamp,
            Unsigned memory withdrawalRequestAmount,
            Unsigned memory rawCollateral,
            uint256 transferPositionRequestPassTimestamp
        );

        function getCollateral(address sponsor) external view returns (Unsigned memory);

        function getLiquidations(address sponsor) external view returns (RawLiquidation[] memory);

        function collateralRequirement() external view returns (uint256 rawValue);

        function minSponsorTokens() external view returns (uint256 rawValue);

        function liquidationLiveness() external view returns (uint256);

        function getCurrentTime() external view returns (uint256);

        function collateralCurrency() external view returns (address);

        function tokenCurrency() external view returns (address);

        function priceIdentifier() external view returns (bytes32);

        function createLiquidation(
            address sponsor,
            Unsigned calldata minCollateralPerToken,
            Unsigned calldata maxCollateralPerToken,
            Unsigned calldata maxTokensToLiquidate,
            uint256 deadline
        ) external returns (
            uint256 liquidationId,
            Unsigned memory totalPaid,
            Unsigned memory finalFeeBond
        );

        function dispute(uint256 liquidationId, address sponsor)
            external
            returns (Unsigned memory totalPaid);

        function withdrawLiquidation(uint256 liquidationId, address sponsor)
            external
            returns (Unsigned memory amountWithdrawn);
    }

    #[sol(rpc)]
    interface IUniswapV2Pair {
        event Sync(uint112 reserve0, uint112 reserve1);

        function token0() external view returns (address);

        function token1() external view returns (address);
    }

    #[sol(rpc)]
    interface IERC20Metadata {
        function decimals() external view returns (uint8);
    }
}
