//! Admin read API: a small axum surface for operators to inspect saga
//! state without touching the store directly.
//!
//! Router layout mirrors the teacher framework's topology REST API
//! (`serve`/`router` split for testability, `tower_http` CORS); the routes
//! themselves are grounded in the original FastAPI saga-instance router
//! from the system this was distilled from.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::saga::{SagaInstance, SagaStatus};
use crate::store::SagaStore;

type AppState = Arc<dyn SagaStore>;

pub async fn serve(store: Arc<dyn SagaStore>, port: u16) -> std::io::Result<()> {
    let app = router(store);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let actual_port = listener.local_addr()?.port();
    info!(port = actual_port, "saga admin API listening");
    axum::serve(listener, app).await
}

pub fn router(store: Arc<dyn SagaStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/sagas/:saga_id", get(get_saga))
        .route("/sagas/by-shipment/:shipment_id", get(get_by_shipment))
        .route("/sagas/active", get(list_active))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

#[derive(Debug, Serialize)]
struct SagaResponse {
    saga_id: Uuid,
    saga_type: String,
    shipment_id: Uuid,
    warehouse_id: Option<Uuid>,
    delivery_id: Option<Uuid>,
    status: SagaStatus,
    current_step: String,
    started_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    failed_step: Option<String>,
    error_message: Option<String>,
}

impl From<SagaInstance> for SagaResponse {
    fn from(saga: SagaInstance) -> Self {
        Self {
            saga_id: saga.saga_id,
            saga_type: saga.saga_type,
            shipment_id: saga.shipment_id,
            warehouse_id: saga.warehouse_id,
            delivery_id: saga.delivery_id,
            status: saga.status,
            current_step: saga.current_step,
            started_at: saga.started_at,
            updated_at: saga.updated_at,
            failed_step: saga.failed_step,
            error_message: saga.error_message,
        }
    }
}

async fn get_saga(
    State(store): State<AppState>,
    Path(saga_id): Path<Uuid>,
) -> Result<Json<SagaResponse>, StatusCode> {
    let saga = store.get(saga_id).await.map_err(|e| {
        error!(error = %e, %saga_id, "failed to load saga");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    saga.map(SagaResponse::from).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_by_shipment(
    State(store): State<AppState>,
    Path(shipment_id): Path<Uuid>,
) -> Result<Json<SagaResponse>, StatusCode> {
    let saga = store.get_active_by_shipment(shipment_id).await.map_err(|e| {
        error!(error = %e, %shipment_id, "failed to load saga by shipment");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    saga.map(SagaResponse::from).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct ListActiveQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn list_active(
    State(store): State<AppState>,
    Query(query): Query<ListActiveQuery>,
) -> Result<Json<Vec<SagaResponse>>, StatusCode> {
    let sagas = store.list_active(query.limit).await.map_err(|e| {
        error!(error = %e, "failed to list active sagas");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(sagas.into_iter().map(SagaResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::SHIPMENT_FULFILLMENT;
    use crate::store::SqliteSagaStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_router() -> (Router, Arc<SqliteSagaStore>) {
        let store = Arc::new(SqliteSagaStore::connect("sqlite::memory:").await.unwrap());
        (router(store.clone()), store)
    }

    #[tokio::test]
    async fn get_saga_returns_404_for_unknown_id() {
        let (app, _store) = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/sagas/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_saga_returns_the_stored_instance() {
        let (app, store) = test_router().await;
        let saga = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
        store.insert(&saga).await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/sagas/{}", saga.saga_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_active_respects_the_limit_query_param() {
        let (app, store) = test_router().await;
        for _ in 0..3 {
            let saga = SagaInstance::start(Uuid::new_v4(), Uuid::new_v4(), SHIPMENT_FULFILLMENT, "reserve_inventory");
            store.insert(&saga).await.unwrap();
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sagas/active?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let sagas: Vec<SagaResponse> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(sagas.len(), 2);
    }
}
