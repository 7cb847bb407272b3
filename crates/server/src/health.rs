use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use outlay_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub component: &'static str,
    pub ready: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: Vec<ComponentHealth>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Readiness probe: 200 while every component answers, 503 otherwise. The
/// database check runs a real query through the shared pool.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_health(&state.db_pool).await;
    let service = ComponentHealth {
        component: "service",
        ready: true,
        detail: "approval engine wired".to_string(),
    };

    let all_ready = service.ready && database.ready;
    let response = HealthResponse {
        status: if all_ready { "ready" } else { "degraded" },
        components: vec![service, database],
        checked_at: Utc::now().to_rfc3339(),
    };

    let code = if all_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(response))
}

async fn database_health(pool: &DbPool) -> ComponentHealth {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => ComponentHealth {
            component: "database",
            ready: true,
            detail: "probe query succeeded".to_string(),
        },
        Err(error) => ComponentHealth {
            component: "database",
            ready: false,
            detail: format!("probe query failed: {error}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};

    use outlay_db::connect_with_settings;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert!(payload.components.iter().all(|component| component.ready));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        let database =
            payload.components.iter().find(|component| component.component == "database");
        assert!(database.is_some_and(|component| !component.ready));
    }
}
