//! HTTP control API.

use crate::driver::DriverHandle;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ecosim_core::{ConfigureRequest, PopulationSample};
use ecosim_world::{Command, Snapshot, Status};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub driver: DriverHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/history", get(get_history))
        .route("/api/status", get(get_status))
        .route("/api/configure", post(configure))
        .route("/api/start", post(start))
        .route("/api/pause", post(pause))
        .route("/api/reset", post(reset))
        .route("/api/step", post(step))
        .route("/api/speed", post(set_speed))
        .with_state(state)
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Latest published snapshot
pub async fn get_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(Snapshot::clone(&state.driver.snapshot()))
}

pub async fn get_history(State(state): State<AppState>) -> Json<Vec<PopulationSample>> {
    Json(state.driver.history().to_vec())
}

pub async fn get_status(State(state): State<AppState>) -> Json<Status> {
    Json(state.driver.status())
}

pub async fn configure(
    State(state): State<AppState>,
    Json(request): Json<ConfigureRequest>,
) -> Result<Json<Status>, ApiError> {
    info!(?request, "Configure requested");
    let applied = state.driver.send(Command::Configure(request)).await?;
    Ok(Json(applied.status))
}

pub async fn start(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    Ok(Json(state.driver.send(Command::Start).await?.status))
}

pub async fn pause(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    Ok(Json(state.driver.send(Command::Pause).await?.status))
}

pub async fn reset(State(state): State<AppState>) -> Result<Json<Status>, ApiError> {
    Ok(Json(state.driver.send(Command::Reset).await?.status))
}

/// Advance one tick and return that tick's snapshot
pub async fn step(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    let applied = state.driver.send(Command::Step).await?;
    let snapshot = applied
        .snapshot
        .ok_or_else(|| ApiError::Internal("step produced no snapshot".to_string()))?;
    Ok(Json(Snapshot::clone(&snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct SpeedRequest {
    multiplier: f64,
}

pub async fn set_speed(
    State(state): State<AppState>,
    Json(request): Json<SpeedRequest>,
) -> Result<Json<Status>, ApiError> {
    let applied = state
        .driver
        .send(Command::SetSpeed {
            multiplier: request.multiplier,
        })
        .await?;
    Ok(Json(applied.status))
}

// Error handling
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, message).into_response()
    }
}

impl From<ecosim_core::Error> for ApiError {
    fn from(err: ecosim_core::Error) -> Self {
        if err.is_validation() {
            warn!("Rejected request: {}", err);
            ApiError::BadRequest(err.to_string())
        } else {
            error!("Core error: {}", err);
            ApiError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ecosim_core::EcosystemConfig;
    use ecosim_world::{ControlSurface, RunState};
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    fn app() -> Router {
        let surface = ControlSurface::new(EcosystemConfig {
            seed: Some(9),
            ..Default::default()
        })
        .unwrap();
        let (driver, _task) = driver::spawn(surface);
        router(AppState { driver })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_snapshot_after_startup() {
        let response = app().oneshot(get_request("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot: Snapshot = read_json(response).await;
        assert_eq!(snapshot.step_count, 0);
        assert_eq!(snapshot.species_counts.cow, 10);
        assert_eq!(snapshot.species_counts.tiger, 2);
    }

    #[tokio::test]
    async fn test_step_returns_next_snapshot() {
        let app = app();
        let response = app.clone().oneshot(post_empty("/api/step")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: Snapshot = read_json(response).await;
        assert_eq!(snapshot.step_count, 1);

        let response = app.oneshot(get_request("/api/history")).await.unwrap();
        let history: Vec<PopulationSample> = read_json(response).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].step, 1);
    }

    #[tokio::test]
    async fn test_configure_rejects_out_of_range() {
        let body = serde_json::json!({
            "world_width": 400,
            "world_height": 400,
            "initial_grass": 5,
            "initial_cows": 10,
            "initial_tigers": 2,
            "speed_multiplier": 1.0
        });
        let response = app().oneshot(post_json("/api/configure", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_configure_then_reset() {
        let app = app();
        let body = serde_json::json!({
            "world_width": 500,
            "world_height": 450,
            "initial_grass": 100,
            "initial_cows": 20,
            "initial_tigers": 4,
            "speed_multiplier": 2.0
        });
        let response = app
            .clone()
            .oneshot(post_json("/api/configure", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: Status = read_json(response).await;
        assert!(status.reset_pending);
        assert_eq!(status.speed_multiplier, 2.0);

        let response = app.clone().oneshot(post_empty("/api/reset")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot: Snapshot = read_json(app.oneshot(get_request("/api/snapshot")).await.unwrap()).await;
        assert_eq!(snapshot.world_width, 500);
        assert_eq!(snapshot.world_height, 450);
        assert_eq!(snapshot.species_counts.cow, 20);
        assert_eq!(snapshot.species_counts.tiger, 4);
    }

    #[tokio::test]
    async fn test_start_and_pause() {
        let app = app();
        let status: Status =
            read_json(app.clone().oneshot(post_empty("/api/start")).await.unwrap()).await;
        assert_eq!(status.run_state, RunState::Running);

        let status: Status =
            read_json(app.clone().oneshot(post_empty("/api/pause")).await.unwrap()).await;
        assert_eq!(status.run_state, RunState::Paused);

        let status: Status = read_json(app.oneshot(get_request("/api/status")).await.unwrap()).await;
        assert_eq!(status.run_state, RunState::Paused);
    }

    #[tokio::test]
    async fn test_speed_bounds() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_json("/api/speed", serde_json::json!({ "multiplier": 0.5 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/api/speed", serde_json::json!({ "multiplier": 6.0 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
