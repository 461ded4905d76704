use std::sync::Arc;

use tracing::info;

use escrow_engine::config::AppConfig;
use escrow_engine::escrow::{EscrowEngine, EscrowStore, FeeBearer, MemoryStore};
use escrow_engine::escrow::db::PgStore;
use escrow_engine::funding::{
    DepositService, FundingStore, MemoryFunding, PgFunding, WithdrawService,
};
use escrow_engine::gateway::{self, AppState, EscrowDefaults};
use escrow_engine::logging::init_logging;
use escrow_engine::notify::{EventNotifier, RiskMonitor, StaffBot};

const GIT_HASH: &str = env!("GIT_HASH");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = GIT_HASH,
        env = %env,
        "escrow-engine starting"
    );

    let (store, funding): (Arc<dyn EscrowStore>, Arc<dyn FundingStore>) =
        match &config.postgres_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(16)
                    .connect(url)
                    .await?;
                let store = PgStore::new(pool.clone());
                store.init_schema().await?;
                let funding = PgFunding::new(pool);
                funding.init_schema().await?;
                info!("using postgres store");
                (Arc::new(store), Arc::new(funding))
            }
            None => {
                let store: Arc<dyn EscrowStore> = Arc::new(MemoryStore::new());
                info!("no postgres_url configured, using in-memory store");
                (store.clone(), Arc::new(MemoryFunding::new(store)))
            }
        };

    let mut notifier = EventNotifier::new().with_sink(Arc::new(RiskMonitor::new(
        std::time::Duration::from_secs(config.risk.min_turnaround_secs),
    )));
    if let Some(url) = &config.staff_webhook_url {
        notifier = notifier.with_sink(Arc::new(StaffBot::new(url.clone())));
    }
    let notifier = Arc::new(notifier);

    let engine = Arc::new(EscrowEngine::new(store, notifier.clone()));
    let deposits = Arc::new(DepositService::new(
        funding.clone(),
        config.funding.amount_tolerance,
    ));
    let withdrawals = Arc::new(WithdrawService::new(funding));

    let fee_bearer = match config.escrow.fee_bearer.as_str() {
        "buyer" => FeeBearer::Buyer,
        "split" => FeeBearer::Split,
        _ => FeeBearer::Seller,
    };
    let state = Arc::new(AppState {
        engine,
        notifier,
        deposits,
        withdrawals,
        defaults: EscrowDefaults {
            fee_percent: config.escrow.fee_percent,
            fee_bearer,
            dispute_window_hours: config.escrow.dispute_window_hours,
        },
    });

    gateway::serve(state, &config.gateway.host, config.gateway.port).await
}
