//! Native rate encodings of each protocol converted to an annual percentage
//! yield. Compounding is evaluated as `exp(n * ln(1 + r)) - 1` to keep
//! precision for tiny per-period rates.

use alloy_primitives::U256;

use crate::types::TokenAmount;

pub const RAY_DECIMALS: u8 = 27;
pub const WAD_DECIMALS: u8 = 18;

pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;
/// Compound v3 rates are quoted per second and compounded per 15 s block.
pub const COMPOUND_V3_BLOCK_SECONDS: f64 = 15.0;
pub const COMPOUND_V3_BLOCKS_PER_YEAR: f64 = 2_102_400.0;
/// 12 s blocks.
pub const COMPOUND_V2_BLOCKS_PER_YEAR: f64 = 2_628_000.0;

pub fn ray() -> U256 {
    U256::from(10u64).pow(U256::from(RAY_DECIMALS))
}

pub fn wad() -> U256 {
    U256::from(10u64).pow(U256::from(WAD_DECIMALS))
}

fn scaled(raw: U256, decimals: u8) -> f64 {
    TokenAmount::new(raw, decimals).to_f64()
}

/// `(1 + rate)^periods - 1`, as a percent.
pub fn compound_percent(rate_per_period: f64, periods: f64) -> f64 {
    if rate_per_period <= -1.0 || !rate_per_period.is_finite() {
        return 0.0;
    }
    (periods * rate_per_period.ln_1p()).exp_m1() * 100.0
}

/// Aave `currentLiquidityRate` is an annual rate in ray, accrued per second.
pub fn aave_supply_apy(liquidity_rate: U256) -> f64 {
    let apr = scaled(liquidity_rate, RAY_DECIMALS);
    compound_percent(apr / SECONDS_PER_YEAR, SECONDS_PER_YEAR)
}

/// Comet `getSupplyRate` is a per-second rate scaled by 1e18.
pub fn compound_v3_supply_apy(rate_per_second: u64) -> f64 {
    let per_block = scaled(U256::from(rate_per_second), WAD_DECIMALS) * COMPOUND_V3_BLOCK_SECONDS;
    compound_percent(per_block, COMPOUND_V3_BLOCKS_PER_YEAR)
}

/// cToken `supplyRatePerBlock` is a per-block rate scaled by 1e18.
pub fn compound_v2_supply_apy(rate_per_block: U256) -> f64 {
    compound_percent(scaled(rate_per_block, WAD_DECIMALS), COMPOUND_V2_BLOCKS_PER_YEAR)
}

/// Pot `dsr` is a per-second multiplier in ray; `(dsr / RAY)^secondsPerYear - 1`.
pub fn maker_dsr_apy(dsr: U256) -> f64 {
    let per_second = scaled(dsr.saturating_sub(ray()), RAY_DECIMALS);
    compound_percent(per_second, SECONDS_PER_YEAR)
}

/// Comet `getUtilization` scaled by 1e18, as a percent.
pub fn utilization_percent(utilization: u64) -> f64 {
    scaled(U256::from(utilization), WAD_DECIMALS) * 100.0
}

/// Underlying amount held through cTokens: `cTokens * exchangeRate / 1e18`.
pub fn ctoken_underlying(ctokens: U256, exchange_rate: U256) -> U256 {
    ctokens.saturating_mul(exchange_rate) / wad()
}

/// DAI held in the DSR: `pie * chi / RAY`.
pub fn dsr_dai(pie: U256, chi: U256) -> U256 {
    pie.saturating_mul(chi) / ray()
}
