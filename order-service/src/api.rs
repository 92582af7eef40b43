use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};
use shared::{LotSnapshot, OrderError, SellerBalance};
use uuid::Uuid;

use crate::models::{Order, SettlementRecord};
use crate::{catalog, pickup, reservations, settlement};

type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

impl AppState {
    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, OrderError> {
        self.pool
            .get()
            .await
            .map_err(|e| OrderError::Storage(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub buyer_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor_id: Uuid,
    /// Operators (organizers, warehouse managers) may cancel on a buyer's
    /// behalf; authentication of the actor happens upstream.
    #[serde(default)]
    pub operator: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompletePickupRequest {
    pub pickup_code: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn reject(err: OrderError) -> ApiError {
    let status = match err {
        OrderError::InvalidQuantity => StatusCode::UNPROCESSABLE_ENTITY,
        OrderError::InsufficientStock
        | OrderError::LotInactive
        | OrderError::InvalidState
        | OrderError::NotMature => StatusCode::CONFLICT,
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::CodeMismatch | OrderError::Unauthorized => StatusCode::FORBIDDEN,
        OrderError::CodeGenerationFailed => StatusCode::SERVICE_UNAVAILABLE,
        OrderError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match &err {
        // Never leak storage details to callers.
        OrderError::Storage(e) => {
            tracing::error!("Storage error: {}", e);
            "internal error".to_string()
        }
        other => other.to_string(),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.kind(),
            message,
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(reserve_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/complete", post(complete_pickup))
        .route("/lots/:id", get(get_lot))
        .route("/sellers/:id/transactions", get(seller_transactions))
        .route("/sellers/:id/balance", get(seller_balance))
        .route("/transactions/:id/clear", post(clear_hold))
        .route("/transactions/:id/refund", post(refund_hold))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn reserve_order(
    State(state): State<AppState>,
    Json(request): Json<ReserveRequest>,
) -> ApiResult<Order> {
    let mut conn = state.conn().await.map_err(reject)?;
    reservations::reserve(
        &mut conn,
        request.buyer_id,
        request.product_id,
        request.quantity,
    )
    .await
    .map(Json)
    .map_err(reject)
}

async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    let mut conn = state.conn().await.map_err(reject)?;
    reservations::get_order(&mut conn, id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Order> {
    let mut conn = state.conn().await.map_err(reject)?;
    reservations::cancel(&mut conn, id, request.actor_id, request.operator)
        .await
        .map(Json)
        .map_err(reject)
}

async fn complete_pickup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompletePickupRequest>,
) -> ApiResult<Order> {
    let mut conn = state.conn().await.map_err(reject)?;
    pickup::complete_pickup(&mut conn, id, &request.pickup_code)
        .await
        .map(Json)
        .map_err(reject)
}

async fn get_lot(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<LotSnapshot> {
    let mut conn = state.conn().await.map_err(reject)?;
    catalog::get_available_lot(&mut conn, id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn seller_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<SettlementRecord>> {
    let mut conn = state.conn().await.map_err(reject)?;
    settlement::seller_transactions(&mut conn, id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn seller_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SellerBalance> {
    let mut conn = state.conn().await.map_err(reject)?;
    settlement::seller_balance(&mut conn, id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn clear_hold(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SettlementRecord> {
    let mut conn = state.conn().await.map_err(reject)?;
    settlement::clear(&mut conn, id).await.map(Json).map_err(reject)
}

async fn refund_hold(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SettlementRecord> {
    let mut conn = state.conn().await.map_err(reject)?;
    settlement::refund(&mut conn, id).await.map(Json).map_err(reject)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_validation_errors_map_to_client_statuses() {
        assert_eq!(reject(OrderError::InvalidQuantity).0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reject(OrderError::InsufficientStock).0, StatusCode::CONFLICT);
        assert_eq!(reject(OrderError::LotInactive).0, StatusCode::CONFLICT);
    }

    #[test]
    fn lost_races_map_to_conflict() {
        assert_eq!(reject(OrderError::InvalidState).0, StatusCode::CONFLICT);
        assert_eq!(reject(OrderError::NotMature).0, StatusCode::CONFLICT);
    }

    #[test]
    fn storage_errors_do_not_leak_detail() {
        let (status, Json(body)) = reject(OrderError::Storage("relation orders".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal");
        assert!(!body.message.contains("orders"));
    }

    #[test]
    fn code_mismatch_is_forbidden_and_silent_about_the_code() {
        let (status, Json(body)) = reject(OrderError::CodeMismatch);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "CodeMismatch");
    }
}
