use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::coordinator::CommandError;
use crate::coordinator::Coordinator;
use crate::coordinator::WatchHealth;
use crate::entity::EntityRegistry;
use crate::watch::Availability;
use crate::watch::WatchId;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    watches: usize,
    entities: usize,
    polling: bool,
}

/// One entry of the /v1/watches listing
#[derive(Serialize)]
struct WatchStatus {
    watch_id: WatchId,
    availability: Availability,
    revision: u64,
    health: &'static str,
    consecutive_failures: u32,
    retry_in_secs: Option<f64>,
    reason: Option<String>,
}

/// Body of POST /v1/entities/{entity_id}
#[derive(Debug, Deserialize)]
struct SwitchRequest {
    on: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unknown_entity(entity_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("unknown entity '{}'", entity_id),
        )
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        let status = match &e {
            CommandError::Rejected { .. } => StatusCode::CONFLICT,
            CommandError::UnknownWatch(_) => StatusCode::NOT_FOUND,
            CommandError::NotReady(_)
            | CommandError::Unavailable { .. }
            | CommandError::CoordinatorGone => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    coordinator: Coordinator,
    entities: Arc<EntityRegistry>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            watches: state.coordinator.watch_ids().len(),
            entities: state.entities.len(),
            polling: state.coordinator.is_running(),
        }),
    )
}

/// Handler for GET /v1/watches
#[tracing::instrument(skip(state))]
async fn list_watches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut watches = Vec::new();
    for id in state.coordinator.watch_ids() {
        let (Some(snapshot), Some(health)) = (
            state.coordinator.snapshot(&id).await,
            state.coordinator.health(&id).await,
        ) else {
            continue;
        };

        let (label, failures, retry_in, reason) = match health {
            WatchHealth::Healthy => ("healthy", 0, None, None),
            WatchHealth::Retrying { failures, retry_in } => {
                ("retrying", failures, Some(retry_in.as_secs_f64()), None)
            }
            WatchHealth::Failing { failures } => ("failing", failures, None, None),
            WatchHealth::Unavailable { reason } => ("unavailable", 0, None, Some(reason)),
        };

        watches.push(WatchStatus {
            revision: snapshot.revision(),
            watch_id: snapshot.id,
            availability: snapshot.availability,
            health: label,
            consecutive_failures: failures,
            retry_in_secs: retry_in,
            reason,
        });
    }
    Json(watches)
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entities: Vec<serde_json::Value> = state.entities.iter().map(|e| e.state_json()).collect();
    Json(entities)
}

/// Handler for GET /v1/entities/{entity_id}
#[tracing::instrument(skip(state))]
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entity = state
        .entities
        .get(&entity_id)
        .ok_or_else(|| ApiError::unknown_entity(&entity_id))?;
    Ok(Json(entity.state_json()))
}

/// Handler for POST /v1/entities/{entity_id}
#[tracing::instrument(skip(state))]
async fn set_switch(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entity = state
        .entities
        .get(&entity_id)
        .ok_or_else(|| ApiError::unknown_entity(&entity_id))?;
    let switch = entity.as_switch().ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("entity '{}' is not a switch", entity_id),
        )
    })?;

    switch.issue_command(request.on).await?;
    Ok(Json(entity.state_json()))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/watches", get(list_watches))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:entity_id", get(get_entity).post(set_switch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Serves entity state and switch commands until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    coordinator: Coordinator,
    entities: Arc<EntityRegistry>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        coordinator,
        entities,
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .with_context(|| format!("Invalid API listen address {}:{}", listen, port))?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AccountConfig;
    use crate::coordinator::CoordinatorSettings;
    use crate::coordinator::RecordingAlertSink;
    use crate::entity::EntityKind;
    use crate::geo::MockGeocoder;
    use crate::remote::mock::MockWatchService;
    use crate::remote::mock::Step;
    use crate::remote::RemoteError;
    use crate::watch::RawTelemetry;

    async fn app() -> (Arc<AppState>, Arc<MockWatchService>) {
        let service = Arc::new(MockWatchService::new());
        service.reply(
            "w-1",
            RawTelemetry {
                is_home: Some(true),
                charging: Some(true),
                ..Default::default()
            },
        );
        let coordinator = Coordinator::new(
            CoordinatorSettings::default(),
            service.clone(),
            Arc::new(MockGeocoder::new(Ok(0.0))),
            Arc::new(RecordingAlertSink::default()),
        );
        let watch = WatchId::new("w-1");
        coordinator.register(watch.clone());

        let account = AccountConfig {
            base_url: "https://gateway.example".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            watches: vec![watch.clone()],
            names: HashMap::new(),
            entities: EntityKind::all(),
        };
        let entities = EntityRegistry::build(&coordinator, &account).await.unwrap();
        coordinator.refresh_one(&watch).await.unwrap();

        let state = Arc::new(AppState {
            version: "test",
            coordinator,
            entities: Arc::new(entities),
        });
        (state, service)
    }

    async fn router() -> (Router, Arc<MockWatchService>) {
        let (state, service) = app().await;
        (create_router(state), service)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (router, _) = router().await;
        let (status, body) = send(router, get_request("/v1/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_info() {
        let (router, _) = router().await;
        let (status, body) = send(router, get_request("/v1/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "test");
        assert_eq!(body["watches"], 1);
        assert_eq!(body["entities"], 6);
        assert_eq!(body["polling"], false);
    }

    #[tokio::test]
    async fn test_list_entities() {
        let (router, _) = router().await;
        let (status, body) = send(router, get_request("/v1/entities")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["entity_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids.len(), 6);
        assert!(ids.contains(&"device_tracker.w_1_location"));
    }

    #[tokio::test]
    async fn test_get_entity() {
        let (router, _) = router().await;
        let (status, body) =
            send(router.clone(), get_request("/v1/entities/binary_sensor.w_1_charging")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "on");
        assert_eq!(body["attributes"]["device_class"], "battery_charging");

        let (status, body) = send(router, get_request("/v1/entities/light.kitchen")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("light.kitchen"));
    }

    #[tokio::test]
    async fn test_watches() {
        let (router, _) = router().await;
        let (status, body) = send(router, get_request("/v1/watches")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["watch_id"], "w-1");
        assert_eq!(body[0]["health"], "healthy");
        assert_eq!(body[0]["revision"], 1);
    }

    #[tokio::test]
    async fn test_watches_failing_without_retry() {
        let (state, service) = app().await;
        service.set(
            "w-1",
            Step::Reply(Err(RemoteError::Network("connection reset".to_string()))),
        );
        state
            .coordinator
            .refresh_one(&WatchId::new("w-1"))
            .await
            .unwrap();

        let (status, body) = send(create_router(state), get_request("/v1/watches")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["health"], "failing");
        assert_eq!(body[0]["consecutive_failures"], 1);
        assert!(body[0]["retry_in_secs"].is_null());
        assert_eq!(body[0]["availability"], "available");
    }

    #[tokio::test]
    async fn test_toggle_switch() {
        let (router, service) = router().await;
        let (status, body) = send(
            router,
            post_request("/v1/entities/switch.w_1_alarm", r#"{"on": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "on");
        assert_eq!(service.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_rejected() {
        let (router, service) = router().await;
        service.reply_to_command(Err(RemoteError::Rejected("busy".to_string())));
        let (status, body) = send(
            router.clone(),
            post_request("/v1/entities/switch.w_1_silent", r#"{"on": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("rejected"));

        let (_, body) = send(router, get_request("/v1/entities/switch.w_1_silent")).await;
        assert_eq!(body["state"], "off");
    }

    #[tokio::test]
    async fn test_toggle_not_a_switch() {
        let (router, service) = router().await;
        let (status, _) = send(
            router,
            post_request("/v1/entities/binary_sensor.w_1_online", r#"{"on": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(service.commands.lock().unwrap().is_empty());
    }
}
