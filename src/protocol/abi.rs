//! Contract interfaces called by the adapters and the Chainlink price source.

use alloy_sol_types::sol;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IPool {
        struct ReserveConfigurationMap {
            uint256 data;
        }

        struct ReserveData {
            ReserveConfigurationMap configuration;
            uint128 liquidityIndex;
            uint128 currentLiquidityRate;
            uint128 variableBorrowIndex;
            uint128 currentVariableBorrowRate;
            uint128 currentStableBorrowRate;
            uint40 lastUpdateTimestamp;
            uint16 id;
            address aTokenAddress;
            address stableDebtTokenAddress;
            address variableDebtTokenAddress;
            address interestRateStrategyAddress;
            uint128 accruedToTreasury;
            uint128 unbacked;
            uint128 isolationModeTotalDebt;
        }

        function getReserveData(address asset) external view returns (ReserveData memory);
        function supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;
        function withdraw(address asset, uint256 amount, address to) external returns (uint256);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IComet {
        function getUtilization() external view returns (uint64);
        function getSupplyRate(uint256 utilization) external view returns (uint64);
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function supply(address asset, uint256 amount) external;
        function withdraw(address asset, uint256 amount) external;
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface ICToken {
        function balanceOf(address owner) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function exchangeRateStored() external view returns (uint256);
        function supplyRatePerBlock() external view returns (uint256);
        function mint(uint256 mintAmount) external returns (uint256);
        function redeemUnderlying(uint256 redeemAmount) external returns (uint256);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IPot {
        function dsr() external view returns (uint256);
        function chi() external view returns (uint256);
        function Pie() external view returns (uint256);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IDsrManager {
        function pieOf(address usr) external view returns (uint256);
        function join(address dst, uint256 wad) external;
        function exit(address dst, uint256 wad) external;
        function exitAll(address dst) external;
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface AggregatorV3Interface {
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound);
        function decimals() external view returns (uint8);
    }
}
