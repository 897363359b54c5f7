//! Ledger and transaction endpoints
//!
//! Recording, status updates, and deposits/withdrawals submitted through
//! the protocol adapters.

use std::str::FromStr;

use actix_web::{delete, get, post, web, Responder};
use alloy_primitives::{Address, U256};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    configuration::{AppState, State},
    error::Error,
    helpers::{format_units, parse_user},
    model::{NewTransaction, StatusUpdate, Transaction, TransactionStatus, TransactionType},
    provider::Receipt,
    retry::validate_transaction_inputs,
    types::{ProtocolId, Token, TokenAmount},
};

// =============================================================================
// Ledger
// =============================================================================

#[get("/transactions/{user}")]
pub async fn transactions(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let data = state.ledger.get_transactions(user).await?;

    Ok(web::Json(data))
}

#[get("/transactions/{user}/{id}")]
pub async fn transaction(
    state: web::Data<AppState<State>>,
    path: web::Path<(String, String)>,
) -> Result<impl Responder, Error> {
    let (user, id) = path.into_inner();
    let user = parse_user(&user)?;

    match state.ledger.get_transaction(user, &id).await? {
        Some(tx) => Ok(web::Json(tx)),
        None => Err(Error::NotFound(format!("transaction {}", id))),
    }
}

/// Records a transaction the caller submitted on its own.
#[post("/transactions/{user}")]
pub async fn record_transaction(
    state: web::Data<AppState<State>>,
    path: web::Path<String>,
    new: web::Json<NewTransaction>,
) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    let new = new.into_inner();
    validate_transaction_inputs(Some(&new.amount.raw), Some(&user), Some(&new.asset))?;

    let token = state.registry.token(new.protocol, &new.asset)?;
    if !new.symbol.trim().eq_ignore_ascii_case(&token.symbol) {
        return Err(Error::invalid_input(
            format!("{} is {}, not {}", new.asset, token.symbol, new.symbol),
            "Invalid token selected.",
        ));
    }
    if new.amount.decimals != token.decimals {
        return Err(Error::invalid_input(
            format!("{} has {} decimals, got {}", token.symbol, token.decimals, new.amount.decimals),
            "Invalid token selected.",
        ));
    }

    let data = state.ledger.save_transaction(Transaction::pending(user, new)).await?;
    Ok(web::Json(data))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub updated: bool,
}

#[post("/transactions/{user}/{id}/status")]
pub async fn update_status(
    state: web::Data<AppState<State>>,
    path: web::Path<(String, String)>,
    update: web::Json<StatusUpdate>,
) -> Result<impl Responder, Error> {
    let (user, id) = path.into_inner();
    let user = parse_user(&user)?;

    let updated = state
        .ledger
        .update_transaction_status(user, &id, update.into_inner())
        .await?;

    Ok(web::Json(StatusResponse { updated }))
}

#[delete("/ledger/{user}")]
pub async fn clear(state: web::Data<AppState<State>>, path: web::Path<String>) -> Result<impl Responder, Error> {
    let user = parse_user(&path.into_inner())?;
    state.ledger.clear_all_data(user).await?;

    Ok(web::Json(StatusResponse { updated: true }))
}

// =============================================================================
// Deposit / Withdraw
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    user: String,
    protocol: ProtocolId,
    asset: Address,
    /// Human amount, e.g. `"12.5"`. A withdrawal without an amount takes the
    /// whole position, through `exitAll` on Maker DSR.
    amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub transaction: Transaction,
    /// Human amount, e.g. `"12.5"`.
    pub amount: String,
    pub receipt: Receipt,
}

#[post("/deposit")]
pub async fn deposit(
    state: web::Data<AppState<State>>,
    request: web::Json<ActionRequest>,
) -> Result<impl Responder, Error> {
    let request = request.into_inner();
    let user = parse_user(&request.user)?;
    let token = state.registry.token(request.protocol, &request.asset)?;

    let amount = match &request.amount {
        Some(amount) => parse_amount(amount, &token)?,
        None => {
            return Err(Error::invalid_input(
                "deposit without amount",
                "Please enter a valid amount greater than 0.",
            ))
        },
    };

    let data = execute(&state, user, request.protocol, &token, TransactionType::Deposit, amount, false).await?;
    Ok(web::Json(data))
}

#[post("/withdraw")]
pub async fn withdraw(
    state: web::Data<AppState<State>>,
    request: web::Json<ActionRequest>,
) -> Result<impl Responder, Error> {
    let request = request.into_inner();
    let user = parse_user(&request.user)?;
    let token = state.registry.token(request.protocol, &request.asset)?;
    let adapter = state.registry.adapter(request.protocol)?;

    let (amount, all) = match &request.amount {
        Some(amount) => (parse_amount(amount, &token)?, false),
        None => match adapter.get_user_balance(user, token.address).await {
            Some(balance) => (balance.balance, request.protocol == ProtocolId::MakerDsr),
            None => {
                return Err(Error::invalid_input(
                    format!("no {} balance in {}", token.symbol, request.protocol),
                    "There is nothing to withdraw.",
                ))
            },
        },
    };

    let data = execute(&state, user, request.protocol, &token, TransactionType::Withdraw, amount, all).await?;
    Ok(web::Json(data))
}

fn parse_amount(value: &str, token: &Token) -> Result<TokenAmount, Error> {
    let value = BigDecimal::from_str(value.trim()).map_err(|e| {
        Error::invalid_input(
            format!("invalid amount {:?}: {}", value, e),
            "Please enter a valid amount greater than 0.",
        )
    })?;
    TokenAmount::from_decimal(&value, token.decimals)
}

/// Records the action as pending, submits it and settles the ledger entry
/// as confirmed or failed.
async fn execute(
    state: &AppState<State>,
    user: Address,
    protocol: ProtocolId,
    token: &Token,
    kind: TransactionType,
    amount: TokenAmount,
    all: bool,
) -> Result<ActionResponse, Error> {
    validate_transaction_inputs(Some(&amount.raw), Some(&user), Some(&token.address))?;

    let adapter = state.registry.adapter(protocol)?;
    let (price, apy) = tokio::join!(
        state.prices.get_token_price(&token.symbol),
        adapter.get_supply_apy(token.address),
    );

    let pending = state
        .ledger
        .save_transaction(Transaction::pending(
            user,
            NewTransaction {
                hash: None,
                kind,
                protocol,
                asset: token.address,
                symbol: token.symbol.to_owned(),
                amount,
                value_usd: amount.to_f64() * price,
                apy,
            },
        ))
        .await?;

    let result = match kind {
        TransactionType::Deposit => state.registry.deposit(protocol, token.address, amount.raw, user).await,
        _ => {
            let amount: Option<U256> = if all { None } else { Some(amount.raw) };
            state.registry.withdraw(protocol, token.address, amount, user).await
        },
    };

    match result {
        Ok(receipt) => {
            let update = StatusUpdate {
                hash: Some(receipt.hash),
                block_number: receipt.block_number,
                gas_used: receipt.gas_used,
                ..StatusUpdate::new(TransactionStatus::Confirmed)
            };
            state.ledger.update_transaction_status(user, &pending.id, update).await?;
            info!("{} {} {} confirmed: {}", protocol, kind, token.symbol, receipt.hash);

            let settled = state
                .ledger
                .get_transaction(user, &pending.id)
                .await?
                .unwrap_or(pending);

            Ok(ActionResponse {
                amount: format_units(&settled.amount)?,
                transaction: settled,
                receipt,
            })
        },
        Err(e) => {
            let classified = e.classify();
            if let Err(ledger_error) = state
                .ledger
                .update_transaction_status(user, &pending.id, StatusUpdate::failed(classified.message))
                .await
            {
                error!("Could not mark transaction {} failed: {}", pending.id, ledger_error);
            }

            Err(e)
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};
    use alloy_primitives::address;
    use alloy_sol_types::SolCall;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        configuration::default_configuration,
        dao::{Ledger, MemoryStore},
        protocol::{abi::IPool, testing, AaveV3, LiveAdapter, ProtocolRegistry},
        provider::chain::mock::MockChain,
    };

    const USER: &str = "0x00000000000000000000000000000000000000aa";
    const USDC: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

    fn state(registry: Option<ProtocolRegistry>) -> AppState<State> {
        let config = default_configuration().unwrap();
        let prices = testing::prices();
        let registry = registry.unwrap_or_else(|| ProtocolRegistry::fixture(&config.tokens, prices.clone()));

        AppState::new(State {
            ledger: Ledger::new(Arc::new(MemoryStore::new()), 1000, 100),
            config,
            prices,
            registry,
        })
    }

    /// Fixture markets with Aave v3 USDC served by a mock chain.
    fn reverting_aave(chain: Arc<MockChain>) -> ProtocolRegistry {
        let config = default_configuration().unwrap();
        let mut registry = ProtocolRegistry::fixture(&config.tokens, testing::prices());
        let aave = AaveV3::new(
            address!("87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"),
            vec![testing::usdc()],
        );
        registry.register(Arc::new(LiveAdapter::new(aave, testing::context(chain))));
        registry
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new().app_data(web::Data::new($state.clone())).service(
                    web::scope("/api")
                        .service(transactions)
                        .service(record_transaction)
                        .service(deposit)
                        .service(withdraw),
                ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_deposit_is_confirmed_with_hash() {
        let state = state(None);
        let app = app!(state);

        let request = test::TestRequest::post()
            .uri("/api/deposit")
            .set_json(json!({ "user": USER, "protocol": "aave_v3", "asset": USDC, "amount": "25.5" }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["transaction"]["status"], "confirmed");
        assert_eq!(body["transaction"]["type"], "deposit");
        assert_eq!(body["amount"], "25.5");
        assert!(body["transaction"]["hash"].is_string());
        assert_eq!(body["transaction"]["hash"], body["receipt"]["hash"]);

        let user = parse_user(USER).unwrap();
        let positions = state.ledger.get_positions(user).await.unwrap();
        assert_eq!(positions[0].current_balance.raw, U256::from(25_500_000u64));
    }

    #[actix_web::test]
    async fn test_reverted_deposit_fails_and_reverts_position() {
        let chain = Arc::new(MockChain::new());
        chain.revert_on(IPool::supplyCall::SELECTOR);
        let state = state(Some(reverting_aave(chain.clone())));
        let app = app!(state);

        let request = test::TestRequest::post()
            .uri("/api/deposit")
            .set_json(json!({ "user": USER, "protocol": "aave_v3", "asset": USDC, "amount": "10" }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body: Value = test::read_body_json(response).await;
        assert_eq!(body["kind"], "contract_reverted");

        let user = parse_user(USER).unwrap();
        let ledger = state.ledger.get_transactions(user).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].status, TransactionStatus::Failed);
        assert!(ledger[0].error.is_some());

        let positions = state.ledger.get_positions(user).await.unwrap();
        assert!(positions[0].current_balance.is_zero());
        assert_eq!(chain.sent_selectors().len(), 2);
    }

    #[actix_web::test]
    async fn test_withdraw_everything_without_balance_is_bad_request() {
        let state = state(None);
        let app = app!(state);

        let request = test::TestRequest::post()
            .uri("/api/withdraw")
            .set_json(json!({ "user": USER, "protocol": "aave_v3", "asset": DAI }))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let user = parse_user(USER).unwrap();
        assert!(state.ledger.get_transactions(user).await.unwrap().is_empty());
    }

    fn recorded(symbol: &str, decimals: u8, value_usd: f64) -> Value {
        json!({
            "type": "deposit",
            "protocol": "aave_v3",
            "asset": USDC,
            "symbol": symbol,
            "amount": { "raw": { "__type": "bigint", "value": "5000000" }, "decimals": decimals },
            "value_usd": value_usd,
            "apy": 4.2,
        })
    }

    #[actix_web::test]
    async fn test_record_transaction_checks_token() {
        let state = state(None);
        let app = app!(state);

        for (body, expected) in [
            (recorded("usdc", 6, 5.0), StatusCode::OK),
            (recorded("DAI", 6, 5.0), StatusCode::BAD_REQUEST),
            (recorded("USDC", 18, 5.0), StatusCode::BAD_REQUEST),
            (recorded("USDC", 6, -5.0), StatusCode::BAD_REQUEST),
        ] {
            let request = test::TestRequest::post()
                .uri(&format!("/api/transactions/{}", USER))
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&app, request).await.status(), expected);
        }

        let mut unknown = recorded("USDC", 6, 5.0);
        unknown["asset"] = json!("0x000000000000000000000000000000000000dead");
        let request = test::TestRequest::post()
            .uri(&format!("/api/transactions/{}", USER))
            .set_json(unknown)
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::BAD_REQUEST);

        let user = parse_user(USER).unwrap();
        assert_eq!(state.ledger.get_transactions(user).await.unwrap().len(), 1);
    }
}
