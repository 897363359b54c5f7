//! Market data endpoints
//!
//! Version, token prices, protocol markets and allocation suggestions.

use actix_web::{delete, get, post, web, Responder};
use serde::{Deserialize, Serialize};

use crate::{
    calculator::interest::{suggest_optimal_yield, YieldCandidate},
    configuration::{AppState, State},
    error::Error,
};

// =============================================================================
// Version
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse<'a> {
    pub version: Option<&'a str>,
}

#[get("/version")]
pub async fn version() -> Result<impl Responder, Error> {
    const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

    Ok(web::Json(VersionResponse { version: VERSION }))
}

// =============================================================================
// Prices
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    symbols: Option<String>,
}

/// `?symbols=USDC,WETH`; without symbols every configured token is priced.
/// Unavailable prices are left out.
#[get("/prices")]
pub async fn prices(
    state: web::Data<AppState<State>>,
    query: web::Query<PricesQuery>,
) -> Result<impl Responder, Error> {
    let symbols: Vec<String> = match &query.symbols {
        Some(symbols) => symbols
            .split(',')
            .map(|symbol| symbol.trim().to_uppercase())
            .filter(|symbol| !symbol.is_empty())
            .collect(),
        None => state.config.tokens.symbols(),
    };

    if symbols.len() > 50 {
        return Err(Error::invalid_input(
            format!("{} symbols requested", symbols.len()),
            "At most 50 symbols can be priced at once.",
        ));
    }

    let data = state.prices.get_multiple_token_prices(&symbols).await;
    Ok(web::Json(data))
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub cleared: bool,
}

#[delete("/prices/cache")]
pub async fn clear_prices(state: web::Data<AppState<State>>) -> Result<impl Responder, Error> {
    state.prices.clear_cache();
    Ok(web::Json(ClearedResponse { cleared: true }))
}

// =============================================================================
// Protocols
// =============================================================================

#[get("/protocols")]
pub async fn protocols(state: web::Data<AppState<State>>) -> Result<impl Responder, Error> {
    let data = state.registry.get_all_protocol_data().await;
    Ok(web::Json(data))
}

// =============================================================================
// Strategy
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    amount_usd: f64,
    #[serde(default = "default_risk_tolerance")]
    risk_tolerance: u8,
    candidates: Vec<YieldCandidate>,
}

fn default_risk_tolerance() -> u8 {
    5
}

#[post("/strategy")]
pub async fn strategy(request: web::Json<StrategyRequest>) -> Result<impl Responder, Error> {
    if !request.amount_usd.is_finite() || request.amount_usd <= 0.0 {
        return Err(Error::invalid_input(
            format!("invalid amount {}", request.amount_usd),
            "Please enter a valid amount greater than 0.",
        ));
    }

    let data = suggest_optimal_yield(&request.candidates, request.amount_usd, request.risk_tolerance);
    Ok(web::Json(data))
}
