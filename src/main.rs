mod config;
mod database;
mod handlers;
mod models;
mod requests;
mod routes;
mod services;
mod utils;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::services::ledger::PgLedger;
use crate::services::mpesa::MpesaClient;
use crate::services::reconcile;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app_config = AppConfig::from_env().context("loading application config")?;

    let pool = database::connection::establish_pool(&app_config.database_url)
        .await
        .context("connecting to the database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("running migrations")?;

    let mpesa_client = web::Data::new(MpesaClient::from_env().context("configuring M-Pesa client")?);
    let ledger = PgLedger::new(pool.clone());

    if app_config.sweep_interval_secs > 0 {
        let sweep_client = mpesa_client.clone();
        let sweep_ledger = ledger.clone();
        let stale_after = app_config.stale_pending_secs;
        let interval = app_config.sweep_interval_secs;
        info!(
            "Stale-PENDING sweep enabled: every {}s, window {}s",
            interval, stale_after
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match reconcile::sweep_stale(sweep_client.get_ref(), &sweep_ledger, stale_after)
                    .await
                {
                    Ok(0) => {}
                    Ok(settled) => info!("Sweep settled {} donation(s)", settled),
                    Err(e) => error!("Stale sweep failed: {}", e),
                }
            }
        });
    }

    let bind_addr = format!("{}:{}", app_config.host, app_config.port);
    info!("Starting server on {}", bind_addr);

    let pool_data = web::Data::new(pool);
    let config_data = web::Data::new(app_config);
    let ledger_data = web::Data::new(ledger);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(pool_data.clone())
            .app_data(config_data.clone())
            .app_data(mpesa_client.clone())
            .app_data(ledger_data.clone())
            .service(web::scope("/api").configure(routes::api::scoped_config))
    })
    .bind(bind_addr)?
    .run()
    .await?;

    Ok(())
}
