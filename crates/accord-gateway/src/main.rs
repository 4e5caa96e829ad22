use std::{net::SocketAddr, sync::Arc};

use accord_core::{AgreementController, AgreementStore, MemoryAgreementStore, Notifier};
use accord_gateway::{AppState, router};
use accord_platform::{
    LocalFileStorage, LogNotifier, PgAgreementStore, ServiceConfig, SmtpNotifier,
    connect_database, ensure_schema,
};
use anyhow::Result as AnyResult;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "accord_gateway=info,accord_core=info,tower_http=info".to_string()
        }))
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;

    let store: Arc<dyn AgreementStore> = match &config.database_url {
        Some(database_url) => {
            let pool = connect_database(database_url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgAgreementStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; agreements are kept in memory");
            Arc::new(MemoryAgreementStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            warn!("SMTP_HOST not set; access tokens are logged instead of mailed");
            Arc::new(LogNotifier)
        }
    };

    let files = Arc::new(LocalFileStorage::new(config.media_root.clone()));
    let controller =
        AgreementController::new(store, files, notifier, config.agreement_settings());

    let state = AppState { controller };
    let router = router(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("agreement gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
