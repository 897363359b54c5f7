use std::str::FromStr;

use alloy_primitives::U256;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    types::TokenAmount,
};

/// Length of a year in seconds, 365.25 days.
pub const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Projections {
    pub daily: f64,
    pub monthly: f64,
    pub yearly: f64,
}

impl Projections {
    pub fn add(&mut self, other: &Projections) {
        self.daily += other.daily;
        self.monthly += other.monthly;
        self.yearly += other.yearly;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualCalculation {
    pub current_balance: TokenAmount,
    pub earnings: TokenAmount,
    pub earnings_usd: f64,
    /// APY as a percent, echoed from the input.
    pub apy: f64,
    /// Fractional growth per day, `(1 + apy)^(1/365.25) - 1`.
    pub daily_rate: f64,
    pub projections: Projections,
}

/// Compounds `principal` at `apy` percent over `elapsed_seconds`.
///
/// The balance is computed in decimal arithmetic and truncated to whole
/// smallest units, so for a non-negative APY the result is never below the
/// principal and `earnings` is exactly `current_balance - principal`.
pub fn calculate_accrual(
    principal: &TokenAmount,
    apy: f64,
    elapsed_seconds: f64,
    token_price_usd: f64,
) -> Result<AccrualCalculation, Error> {
    if !apy.is_finite() || apy < 0.0 {
        return Err(Error::invalid_input(
            format!("invalid apy {}", apy),
            "APY must be a non-negative number.",
        ));
    }
    if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
        return Err(Error::invalid_input(
            format!("invalid elapsed time {}", elapsed_seconds),
            "Elapsed time cannot be negative.",
        ));
    }

    let rate = apy / 100.0;
    let years = elapsed_seconds / SECONDS_PER_YEAR;
    let factor = (1.0 + rate).powf(years).max(1.0);

    let grown = BigDecimal::from_str(&principal.raw.to_string())? * BigDecimal::from_str(&factor.to_string())?;
    let (digits, _) = grown.with_scale(0).into_bigint_and_exponent();
    let balance = U256::from_str(&digits.to_string())?.max(principal.raw);

    let current_balance = TokenAmount::new(balance, principal.decimals);
    let earnings = TokenAmount::new(balance - principal.raw, principal.decimals);

    let amount = principal.to_f64();
    let daily_rate = (1.0 + rate).powf(1.0 / 365.25) - 1.0;

    Ok(AccrualCalculation {
        current_balance,
        earnings,
        earnings_usd: earnings.to_f64() * token_price_usd,
        apy,
        daily_rate,
        projections: Projections {
            daily: amount * daily_rate * token_price_usd,
            monthly: amount * ((1.0 + rate).powf(1.0 / 12.0) - 1.0) * token_price_usd,
            yearly: amount * rate * token_price_usd,
        },
    })
}

#[derive(Debug, Clone)]
pub struct HeldPosition {
    pub principal: TokenAmount,
    pub current_balance: TokenAmount,
    pub held_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TimeWeightedReturn {
    /// Percent.
    pub total_return: f64,
    /// Percent per year over the average holding time.
    pub annualized_return: f64,
    pub total_principal: f64,
    pub total_current: f64,
}

pub fn calculate_time_weighted_return(positions: &[HeldPosition]) -> TimeWeightedReturn {
    if positions.is_empty() {
        return TimeWeightedReturn::default();
    }

    let total_principal: f64 = positions.iter().map(|position| position.principal.to_f64()).sum();
    let total_current: f64 = positions.iter().map(|position| position.current_balance.to_f64()).sum();

    let overall = if total_principal > 0.0 {
        (total_current - total_principal) / total_principal
    } else {
        0.0
    };

    let average_years = positions
        .iter()
        .map(|position| position.held_seconds.max(0.0) / SECONDS_PER_YEAR)
        .sum::<f64>()
        / positions.len() as f64;

    let annualized = if average_years > 0.0 {
        (1.0 + overall).powf(1.0 / average_years) - 1.0
    } else {
        0.0
    };

    TimeWeightedReturn {
        total_return: overall * 100.0,
        annualized_return: annualized * 100.0,
        total_principal,
        total_current,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct YieldCandidate {
    pub name: String,
    pub apy: f64,
    pub tvl: f64,
    /// 1 (safest) to 10.
    pub risk_score: u8,
    pub gas_estimate_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldSuggestion {
    pub protocol: String,
    /// Percent of the amount.
    pub allocation: f64,
    pub expected_yield: f64,
    pub risk_adjusted_yield: f64,
    pub reasoning: &'static str,
}

/// Ranks candidates within the risk tolerance by net yield discounted for
/// risk and splits `amount_usd` over the best three. Small amounts go to a
/// single protocol to keep gas down.
pub fn suggest_optimal_yield(candidates: &[YieldCandidate], amount_usd: f64, risk_tolerance: u8) -> Vec<YieldSuggestion> {
    let mut ranked: Vec<(&YieldCandidate, f64)> = candidates
        .iter()
        .filter(|candidate| candidate.risk_score <= risk_tolerance)
        .map(|candidate| {
            let net_yield = amount_usd * candidate.apy / 100.0 - candidate.gas_estimate_usd;
            let risk_adjustment = 1.0 - f64::from(candidate.risk_score.saturating_sub(1)) / 20.0;
            (candidate, net_yield * risk_adjustment)
        })
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let split: &[(f64, &'static str)] = if amount_usd < 1_000.0 {
        &[(100.0, "Single protocol keeps gas costs low for a small amount")]
    } else if amount_usd < 10_000.0 {
        &[
            (70.0, "Primary allocation to the highest yield"),
            (30.0, "Secondary allocation for diversification"),
        ]
    } else {
        &[
            (50.0, "Primary allocation with the best risk-adjusted yield"),
            (30.0, "Diversification across top protocols"),
            (20.0, "Diversification across top protocols"),
        ]
    };

    ranked
        .into_iter()
        .zip(split)
        .map(|((candidate, risk_adjusted_yield), (allocation, reasoning))| YieldSuggestion {
            protocol: candidate.name.to_owned(),
            allocation: *allocation,
            expected_yield: amount_usd * allocation / 100.0 * candidate.apy / 100.0,
            risk_adjusted_yield,
            reasoning,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc(raw: u64) -> TokenAmount {
        TokenAmount::new(U256::from(raw), 6)
    }

    #[test]
    fn test_one_year_at_four_percent() {
        let accrual = calculate_accrual(&usdc(1_000_000_000), 4.0, SECONDS_PER_YEAR, 1.0).unwrap();

        assert_eq!(accrual.current_balance.raw, U256::from(1_040_000_000u64));
        assert_eq!(accrual.earnings.raw, U256::from(40_000_000u64));
        assert!((accrual.earnings_usd - 40.0).abs() < 1e-9);
        assert!((accrual.projections.yearly - 40.0).abs() < 1e-9);
        assert!(accrual.projections.monthly > 3.2 && accrual.projections.monthly < 3.3);
        assert!(accrual.projections.daily > 0.107 && accrual.projections.daily < 0.108);
    }

    #[test]
    fn test_balance_never_below_principal() {
        let principals = [usdc(0), usdc(1), usdc(999_999), TokenAmount::new(U256::from(u128::MAX), 18)];
        let apys = [0.0, 0.0001, 3.3, 250.0];
        let elapsed = [0.0, 1.0, 86_400.0, SECONDS_PER_YEAR * 7.5];

        for principal in principals {
            for apy in apys {
                for seconds in elapsed {
                    let accrual = calculate_accrual(&principal, apy, seconds, 2.0).unwrap();
                    assert!(accrual.current_balance.raw >= principal.raw);
                    assert_eq!(accrual.current_balance.raw - principal.raw, accrual.earnings.raw);
                }
            }
        }
    }

    #[test]
    fn test_zero_apy_earns_nothing() {
        let accrual = calculate_accrual(&usdc(123_456_789), 0.0, SECONDS_PER_YEAR * 3.0, 1.0).unwrap();

        assert!(accrual.earnings.is_zero());
        assert_eq!(accrual.earnings_usd, 0.0);
        assert_eq!(accrual.daily_rate, 0.0);
        assert_eq!(accrual.projections, Projections::default());
    }

    #[test]
    fn test_same_inputs_same_result() {
        let principal = usdc(5_000_000_000);
        let first = calculate_accrual(&principal, 4.2, 1_234_567.0, 0.9998).unwrap();
        let second = calculate_accrual(&principal, 4.2, 1_234_567.0, 0.9998).unwrap();

        assert_eq!(first, second);
        assert_eq!(principal, usdc(5_000_000_000));
    }

    #[test]
    fn test_rejects_negative_or_non_finite_inputs() {
        let principal = usdc(1);
        assert!(calculate_accrual(&principal, 4.0, -1.0, 1.0).is_err());
        assert!(calculate_accrual(&principal, -0.5, 10.0, 1.0).is_err());
        assert!(calculate_accrual(&principal, f64::NAN, 10.0, 1.0).is_err());
        assert!(calculate_accrual(&principal, 4.0, f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_time_weighted_return() {
        let positions = [
            HeldPosition {
                principal: usdc(1_000_000_000),
                current_balance: usdc(1_050_000_000),
                held_seconds: SECONDS_PER_YEAR,
            },
            HeldPosition {
                principal: usdc(1_000_000_000),
                current_balance: usdc(1_050_000_000),
                held_seconds: SECONDS_PER_YEAR,
            },
        ];

        let result = calculate_time_weighted_return(&positions);
        assert!((result.total_return - 5.0).abs() < 1e-9);
        assert!((result.annualized_return - 5.0).abs() < 1e-9);
        assert!((result.total_principal - 2000.0).abs() < 1e-9);

        assert_eq!(calculate_time_weighted_return(&[]), TimeWeightedReturn::default());
    }

    #[test]
    fn test_yield_suggestions() {
        let candidate = |name: &str, apy: f64, risk_score: u8| YieldCandidate {
            name: name.to_string(),
            apy,
            tvl: 1e8,
            risk_score,
            gas_estimate_usd: 5.0,
        };
        let candidates = [
            candidate("aave_v3", 4.2, 2),
            candidate("compound_v3", 3.9, 2),
            candidate("maker_dsr", 3.3, 1),
            candidate("degen", 40.0, 9),
        ];

        let small = suggest_optimal_yield(&candidates, 500.0, 5);
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].allocation, 100.0);

        let medium = suggest_optimal_yield(&candidates, 5_000.0, 5);
        assert_eq!(medium.iter().map(|s| s.allocation).collect::<Vec<_>>(), vec![70.0, 30.0]);
        assert_eq!(medium[0].protocol, "aave_v3");

        let large = suggest_optimal_yield(&candidates, 50_000.0, 5);
        assert_eq!(large.len(), 3);
        assert!(large.iter().all(|s| s.protocol != "degen"));

        assert!(suggest_optimal_yield(&candidates, 50_000.0, 0).is_empty());
    }
}
