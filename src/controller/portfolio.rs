//! Portfolio endpoints
//!
//! Live balances, aggregated portfolio, ledger positions, snapshots and
//! performance.

use std::collections::BTreeSet;

use actix_web::{get, post, web, Responder};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    calculator::{
        interest::{calculate_accrual, calculate_time_weighted_return, HeldPosition},
        PortfolioTracker,
    },
    configuration::{AppState, State},
    error::Error,
    helpers::parse_user,
};

#[get("/balances/{user}")]
pub async fn balances(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let data = state.registry.get_user_balances(user).await;

    Ok(web::Json(data))
}

#[get("/portfolio/{user}")]
pub async fn portfolio(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let tracker = PortfolioTracker::new(
        &state.registry,
        &state.prices,
        &state.ledger,
        state.config.default_position_age(),
    );

    Ok(web::Json(tracker.summary(user).await))
}

#[get("/positions/{user}")]
pub async fn positions(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let data = state.ledger.get_positions(user).await?;

    Ok(web::Json(data))
}

/// Time-weighted return of the ledger positions, each grown at its average
/// APY since its first deposit.
#[get("/returns/{user}")]
pub async fn returns(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let now = Utc::now();
    let mut held = vec![];

    for position in state.ledger.get_positions(user).await? {
        if !position.has_balance() {
            continue;
        }

        let held_seconds = (now - position.first_deposit_timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        let accrual = calculate_accrual(&position.current_balance, position.average_apy, held_seconds, position.price_usd)?;

        held.push(HeldPosition {
            principal: position.current_balance,
            current_balance: accrual.current_balance,
            held_seconds,
        });
    }

    Ok(web::Json(calculate_time_weighted_return(&held)))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotsQuery {
    limit: Option<usize>,
}

#[get("/snapshots/{user}")]
pub async fn snapshots(
    state: web::Data<AppState<State>>,
    path: web::Path<String>,
    query: web::Query<SnapshotsQuery>,
) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let limit = query.limit.unwrap_or(100).min(state.config.snapshot_retention);
    let data = state.ledger.get_snapshots(user, limit).await?;

    Ok(web::Json(data))
}

#[post("/snapshots/{user}")]
pub async fn create_snapshot(
    state: web::Data<AppState<State>>,
    path: web::Path<String>,
) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;

    let symbols: Vec<String> = state
        .ledger
        .get_positions(user)
        .await?
        .into_iter()
        .map(|position| position.symbol)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    let prices = state.prices.get_multiple_token_prices(&symbols).await;

    let data = state.ledger.create_snapshot(user, &prices).await?;
    Ok(web::Json(data))
}

#[get("/performance/{user}")]
pub async fn performance(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let data = state.ledger.calculate_performance(user).await?;

    Ok(web::Json(data))
}
