use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::jobs::model::QueueStats;
use crate::jobs::store::JobStore;
use crate::worker::{WorkerBoard, WorkerStatus};

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn JobStore>,
    pub workers: WorkerBoard,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/workers", get(workers))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub now_utc: DateTime<Utc>,
    pub queues: Vec<QueueStats>,
}

fn internal_err(e: anyhow::Error) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

pub async fn stats(
    State(state): State<AdminState>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let now = Utc::now();
    let queues = state.store.stats(now).await.map_err(internal_err)?;
    Ok(Json(StatsResponse {
        now_utc: now,
        queues,
    }))
}

pub async fn workers(State(state): State<AdminState>) -> Json<Vec<WorkerStatus>> {
    Json(state.workers.snapshot())
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryJobStore;
    use crate::jobs::model::NewJob;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let res = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn app(store: &MemoryJobStore) -> Router {
        router(AdminState {
            store: Arc::new(store.clone()),
            workers: WorkerBoard::empty(),
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let res = app(&MemoryJobStore::new())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_report_per_queue_counts() {
        let store = MemoryJobStore::new();
        store.enqueue(NewJob::new("mail", "{}")).await.unwrap();
        store.enqueue(NewJob::new("mail", "{}")).await.unwrap();
        store
            .enqueue(NewJob::new("billing", "{}").scheduled_at(Utc::now() + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let (status, body) = get_json(app(&store), "/stats").await;
        assert_eq!(status, StatusCode::OK);

        let queues = body["queues"].as_array().unwrap();
        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0]["queue_name"], "billing");
        assert_eq!(queues[0]["scheduled"], 1);
        assert_eq!(queues[1]["queue_name"], "mail");
        assert_eq!(queues[1]["pending"], 2);
    }

    #[tokio::test]
    async fn workers_lists_nothing_without_a_pool() {
        let (status, body) = get_json(app(&MemoryJobStore::new()), "/workers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Array(vec![]));
    }
}
