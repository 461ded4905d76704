//! HTTP handlers.
//!
//! Identity arrives in trusted `X-User-Id` / `X-User-Role` headers set by the
//! fronting auth proxy; handlers perform only role and relationship checks.
//! Every response uses the `ApiResponse` envelope, with error codes taken
//! from the typed error taxonomy.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::core_types::TransactionId;
use crate::error::EscrowError;
use crate::escrow::{
    Actor, EscrowAction, FeeBearer, NewTransaction, PartySide, ProductDetails, Role,
};

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "ok".into(),
            data: Some(data),
            msg: None,
        }
    }

    pub fn error(code: &str, msg: impl ToString) -> Self {
        Self {
            code: code.into(),
            data: None,
            msg: Some(msg.to_string()),
        }
    }
}

pub fn map_error(err: EscrowError) -> Response {
    let status = StatusCode::from_u16(err.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(ApiResponse::<()>::error(err.code(), &err));
    (status, body).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse::success(data)).into_response()
}

type ApiResult = Result<Response, Response>;

fn handle<T: Serialize>(result: Result<T, EscrowError>) -> ApiResult {
    result.map(ok).map_err(map_error)
}

// ============================================================================
// Identity
// ============================================================================

/// Caller identity from the trusted auth proxy headers.
pub struct Identity(pub Actor);

fn bad_identity(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error("UNAUTHENTICATED", msg)),
    )
        .into_response()
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| bad_identity("missing or malformed X-User-Id"))?;

        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("user");

        let actor = match role {
            "user" => Actor::user(id),
            "moderator" => Actor::moderator(id),
            "admin" => Actor::admin(id),
            // Root flag carried as its own role value by the proxy
            "root" => Actor {
                id,
                role: Role::Admin,
                root_admin: true,
            },
            other => return Err(bad_identity(&format!("unknown role {other}"))),
        };
        Ok(Identity(actor))
    }
}

fn parse_id(raw: &str) -> Result<TransactionId, Response> {
    TransactionId::from_str(raw)
        .map_err(|_| map_error(EscrowError::Validation(format!("malformed id {raw}"))))
}

// ============================================================================
// Escrow endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateEscrowRequest {
    pub side: PartySide,
    #[serde(flatten)]
    pub details: ProductDetails,
    pub amount: Decimal,
    pub fee_percent: Option<Decimal>,
    pub fee_bearer: Option<FeeBearer>,
    pub dispute_window_hours: Option<i64>,
}

pub async fn create_escrow(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Json(req): Json<CreateEscrowRequest>,
) -> ApiResult {
    let input = NewTransaction {
        creator: actor.id,
        creator_side: req.side,
        details: req.details,
        amount: req.amount,
        fee_percent: req.fee_percent.unwrap_or(state.defaults.fee_percent),
        fee_bearer: req.fee_bearer.unwrap_or(state.defaults.fee_bearer),
        dispute_window_hours: req
            .dispute_window_hours
            .unwrap_or(state.defaults.dispute_window_hours),
    };
    handle(state.engine.create(&actor, input).await)
}

pub async fn get_escrow(
    State(state): State<Arc<AppState>>,
    Identity(_): Identity,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    handle(state.engine.get(id).await)
}

pub async fn get_escrow_by_code(
    State(state): State<Arc<AppState>>,
    Identity(_): Identity,
    Path(code): Path<String>,
) -> ApiResult {
    handle(state.engine.get_by_code(&code).await)
}

pub async fn list_escrows(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
) -> ApiResult {
    handle(state.engine.list_for_user(actor.id).await)
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub side: PartySide,
    #[serde(flatten)]
    pub details: Option<ProductDetails>,
}

pub async fn join_escrow(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> ApiResult {
    let id = parse_id(&id)?;
    handle(state.engine.join(&actor, id, req.side, req.details).await)
}

pub async fn update_details(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(details): Json<ProductDetails>,
) -> ApiResult {
    let id = parse_id(&id)?;
    handle(state.engine.update_details(&actor, id, details).await)
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    handle(state.engine.acknowledge(&actor, id).await)
}

pub async fn assign_moderator(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id)?;
    handle(state.engine.assign_moderator(&actor, id).await)
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub reason: Option<String>,
}

impl ActionRequest {
    fn into_action(self) -> Result<EscrowAction, EscrowError> {
        match self.action.as_str() {
            "fund" => Ok(EscrowAction::Fund),
            "ship" => Ok(EscrowAction::Ship),
            "confirm_receipt" => Ok(EscrowAction::ConfirmReceipt),
            "dispute" => Ok(EscrowAction::Dispute {
                reason: self.reason.unwrap_or_default(),
            }),
            "resolve_release" => Ok(EscrowAction::ResolveRelease),
            "resolve_refund" => Ok(EscrowAction::ResolveRefund),
            "cancel" => Ok(EscrowAction::Cancel),
            other => Err(EscrowError::Validation(format!("unknown action {other}"))),
        }
    }
}

pub async fn post_action(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> ApiResult {
    let id = parse_id(&id)?;
    let action = req.into_action().map_err(map_error)?;
    handle(state.engine.transition(&actor, id, action).await)
}

// ============================================================================
// Wallet and funding endpoints
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
) -> ApiResult {
    handle(
        state
            .engine
            .store()
            .balance(actor.id)
            .await
            .map(|balance| BalanceResponse { balance }),
    )
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
}

pub async fn create_topup(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Json(req): Json<TopUpRequest>,
) -> ApiResult {
    handle(state.deposits.create_intent(actor.id, req.amount).await)
}

/// Payment-provider callback. Unauthenticated by design; the provider is
/// matched on content, not identity.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub content: String,
    pub amount: Decimal,
}

pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PaymentWebhookRequest>,
) -> ApiResult {
    handle(state.deposits.handle_payment(&req.content, req.amount).await)
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
}

pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Json(req): Json<WithdrawRequest>,
) -> ApiResult {
    handle(state.withdrawals.apply(actor.id, req.amount).await)
}

pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
) -> ApiResult {
    handle(state.withdrawals.list_for_user(actor.id).await)
}

#[derive(Debug, Deserialize)]
pub struct ResolveWithdrawalRequest {
    pub approve: bool,
}

pub async fn resolve_withdrawal(
    State(state): State<Arc<AppState>>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(req): Json<ResolveWithdrawalRequest>,
) -> ApiResult {
    handle(state.withdrawals.resolve(&actor, &id, req.approve).await)
}
