use actix_cors::Cors;
use actix_web::{dev::Server, http::header, middleware, web, App, HttpServer};

use crate::{
    configuration::{AppState, State},
    controller::{market, portfolio, transactions},
    error::Error,
};

pub async fn server_task(app_state: &AppState<State>) -> Result<(), Error> {
    let app = app_state.clone();
    tokio::spawn(async move {
        let server = init_server(app)?;
        server.await?;
        Ok(())
    })
    .await?
}

fn init_server(app_state: AppState<State>) -> Result<Server, Error> {
    let host = app_state.config.server_host.to_owned();
    let port = app_state.config.port;

    let server = HttpServer::new(move || {
        let app = app_state.clone();
        let allowed_cors = String::from("*");
        let cors_access_all = app.config.allowed_origins.contains(&allowed_cors);
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                if cors_access_all {
                    return true;
                }
                let allowed = &app.config.allowed_origins;
                if let Ok(origin) = origin.to_str() {
                    return allowed.contains(&origin.to_owned());
                }
                false
            })
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
            .allowed_header(header::CONTENT_TYPE);

        App::new()
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().limit(16_384))
            .service(
                web::scope("/api")
                    .service(market::version)
                    .service(market::prices)
                    .service(market::clear_prices)
                    .service(market::protocols)
                    .service(market::strategy)
                    .service(portfolio::balances)
                    .service(portfolio::portfolio)
                    .service(portfolio::positions)
                    .service(portfolio::returns)
                    .service(portfolio::snapshots)
                    .service(portfolio::create_snapshot)
                    .service(portfolio::performance)
                    .service(transactions::transactions)
                    .service(transactions::transaction)
                    .service(transactions::record_transaction)
                    .service(transactions::update_status)
                    .service(transactions::clear)
                    .service(transactions::deposit)
                    .service(transactions::withdraw),
            )
    })
    .bind((host, port))?
    .disable_signals()
    .run();
    Ok(server)
}
