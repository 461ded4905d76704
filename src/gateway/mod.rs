//! HTTP gateway: axum router over the escrow engine, funding services, and
//! the websocket event feed.

pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::info;

use crate::escrow::{EscrowEngine, FeeBearer};
use crate::funding::{DepositService, WithdrawService};
use crate::notify::EventNotifier;

/// Per-transaction defaults applied when a create request omits them.
#[derive(Debug, Clone)]
pub struct EscrowDefaults {
    pub fee_percent: Decimal,
    pub fee_bearer: FeeBearer,
    pub dispute_window_hours: i64,
}

pub struct AppState {
    pub engine: Arc<EscrowEngine>,
    pub notifier: Arc<EventNotifier>,
    pub deposits: Arc<DepositService>,
    pub withdrawals: Arc<WithdrawService>,
    pub defaults: EscrowDefaults,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let escrow_routes = Router::new()
        .route(
            "/escrow",
            post(handlers::create_escrow).get(handlers::list_escrows),
        )
        .route("/escrow/{id}", get(handlers::get_escrow))
        .route("/escrow/code/{code}", get(handlers::get_escrow_by_code))
        .route("/escrow/{id}/join", post(handlers::join_escrow))
        .route("/escrow/{id}/details", put(handlers::update_details))
        .route("/escrow/{id}/acknowledge", post(handlers::acknowledge))
        .route("/escrow/{id}/moderator", post(handlers::assign_moderator))
        .route("/escrow/{id}/action", post(handlers::post_action))
        .route("/escrow/{id}/events", get(ws::ws_events));

    let wallet_routes = Router::new()
        .route("/wallet/balance", get(handlers::get_balance))
        .route("/wallet/topup", post(handlers::create_topup))
        .route("/wallet/withdraw", post(handlers::create_withdrawal))
        .route("/wallet/withdrawals", get(handlers::list_withdrawals))
        .route(
            "/withdrawals/{id}/resolve",
            post(handlers::resolve_withdrawal),
        )
        .route("/payments/webhook", post(handlers::payment_webhook));

    Router::new()
        .nest("/api/v1", escrow_routes.merge(wallet_routes))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
