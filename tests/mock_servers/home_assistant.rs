//! Mock Home Assistant for testing
//!
//! Serves `/api/states/<entity>` and `/api/services/<domain>/<service>`,
//! records service calls and answers `?return_response` calls with canned
//! SpotifyPlus payloads.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const TOKEN: &str = "test-token";

/// A recorded service call
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// `domain.service`
    pub service: String,
    pub body: Value,
    pub return_response: bool,
}

struct MockHaState {
    entities: HashMap<String, Value>,
    calls: Vec<ServiceCall>,
    responses: HashMap<String, Value>,
    failures: HashMap<String, (StatusCode, String)>,
}

type Shared = Arc<RwLock<MockHaState>>;

pub struct MockHomeAssistant {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockHomeAssistant {
    /// Start a mock Home Assistant on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockHaState {
            entities: HashMap::new(),
            calls: Vec::new(),
            responses: HashMap::new(),
            failures: HashMap::new(),
        }));

        let app = Router::new()
            .route("/api/states/{entity_id}", get(handle_state))
            .route("/api/services/{domain}/{service}", post(handle_service))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Set an entity's state and attributes
    pub async fn set_entity(&self, entity_id: &str, state: &str, attributes: Value) {
        self.state.write().await.entities.insert(
            entity_id.to_string(),
            json!({
                "entity_id": entity_id,
                "state": state,
                "attributes": attributes,
            }),
        );
    }

    /// Payload returned as `service_response.result` for `domain.service`
    pub async fn set_response(&self, service: &str, result: Value) {
        self.state
            .write()
            .await
            .responses
            .insert(service.to_string(), result);
    }

    /// Make `domain.service` fail with a Home Assistant style error body
    pub async fn fail_service(&self, service: &str, status: StatusCode, message: &str) {
        self.state
            .write()
            .await
            .failures
            .insert(service.to_string(), (status, message.to_string()));
    }

    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.state.read().await.calls.clone()
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

async fn handle_state(
    State(state): State<Shared>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !authorized(&headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        ));
    }
    let state = state.read().await;
    state.entities.get(&entity_id).cloned().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Entity not found." })),
    ))
}

async fn handle_service(
    State(state): State<Shared>,
    Path((domain, service)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !authorized(&headers) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        ));
    }

    let name = format!("{}.{}", domain, service);
    let return_response = query.is_some_and(|q| q.contains("return_response"));

    let mut state = state.write().await;
    state.calls.push(ServiceCall {
        service: name.clone(),
        body,
        return_response,
    });

    if let Some((status, message)) = state.failures.get(&name) {
        return Err((*status, Json(json!({ "message": message }))));
    }

    if return_response {
        let result = state.responses.get(&name).cloned().unwrap_or(Value::Null);
        return Ok(Json(json!({
            "changed_states": [],
            "service_response": { "result": result, "user_profile": {} }
        })));
    }
    Ok(Json(json!([])))
}
