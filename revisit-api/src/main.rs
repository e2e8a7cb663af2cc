use anyhow::Context;
use revisit_api::{app, AppState};
use revisit_core::receipt::{CommandReceiptReader, DisabledReceiptReader};
use revisit_core::ReceiptReader;
use revisit_store::{Config, DbClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "revisit_api=debug,revisit_core=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting revisit API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_loyalty_rules(config.loyalty.clone())
        .await
        .context("Failed to read loyalty rules")?;
    tracing::info!(
        "Loyalty rules: every {} visits, every {} spent, birthday cooldown {} days, {:?} crossing",
        rules.visit_step,
        rules.spend_unit,
        rules.birthday_cooldown_days,
        rules.visit_crossing
    );

    let receipts: Arc<dyn ReceiptReader> = match &config.ocr.command {
        Some(command) => {
            tracing::info!("Receipt OCR via `{}`", command);
            Arc::new(CommandReceiptReader::new(
                command.clone(),
                config.ocr.args.clone(),
                config.ocr.timeout(),
            ))
        }
        None => {
            tracing::warn!("No OCR command configured; receipt visits are disabled");
            Arc::new(DisabledReceiptReader)
        }
    };

    let app = app(AppState::new(&db, receipts, &rules)?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
