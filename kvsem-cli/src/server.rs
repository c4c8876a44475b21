//! Local server speaking the session and KV subset of the Consul HTTP API
//! that the semaphore uses, so `kvsem run` works without a Consul cluster.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use kvsem_core::infrastructure::{KvStore, KvStoreExt};
use kvsem_core::infrastructure_in_memory::InMemoryKvStore;
use kvsem_core::types::{PutOptions, SessionRequest};
use kvsem_core::wire::{KvPairJson, SessionCreateJson, SessionIdJson, SessionInfoJson};
use kvsem_core::StoreError;

use crate::handlers::*;

pub type AppState = Arc<dyn KvStoreExt + Send + Sync>;

const MAX_IN_FLIGHT: usize = 256;

pub async fn run(host: &str, port: u16, storage: &str) -> Result<(), String> {
    let app = router(create_store(storage));
    let addr = format!("{}:{}", host, port);

    if std::env::var("KVSEM_API_KEY").is_ok() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No KVSEM_API_KEY set, server is open (dev mode)");
    }

    tracing::info!("kvsem server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        .route("/v1/session/create", put(create_session))
        .route("/v1/session/renew/{id}", put(renew_session))
        .route("/v1/session/destroy/{id}", put(destroy_session))
        .route("/v1/session/info/{id}", get(session_info))
        .route("/v1/session/list", get(list_sessions))
        .route(
            "/v1/kv/{*key}",
            get(get_key).put(put_key).delete(delete_key),
        )
        .layer(middleware::from_fn(auth_middleware))
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
        .with_state(state)
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let expected_key = match std::env::var("KVSEM_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => return Ok(next.run(request).await),
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    // Consul clients send X-Consul-Token; also accept a bearer token
    let token = headers
        .get("x-consul-token")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Unauthorized request to {}", request.uri().path());
        Err(StatusCode::FORBIDDEN)
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

struct ApiError(StatusCode, String);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        // Consul reports unknown sessions on acquire as a 500
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.into())
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(store): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        sessions: store.sessions()?.len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn create_session(
    State(store): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<SessionIdJson>> {
    let body: SessionCreateJson = if body.is_empty() {
        SessionCreateJson::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("Request decode failed: {}", e)))?
    };
    let request = SessionRequest::try_from(body).map_err(|e| bad_request(e.to_string()))?;

    let id = store.create_session(&request)?;
    tracing::info!(session_id = %id, name = %request.name, ttl = ?request.ttl, "Session created");
    Ok(Json(SessionIdJson { id }))
}

async fn renew_session(
    State(store): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SessionInfoJson>>> {
    if !store.renew_session(&id)? {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("Session id '{}' not found", id),
        ));
    }
    tracing::debug!(session_id = %id, "Session renewed");
    session_info(State(store), Path(id)).await
}

async fn destroy_session(
    State(store): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<bool>> {
    store.destroy_session(&id)?;
    tracing::info!(session_id = %id, "Session destroyed");
    Ok(Json(true))
}

async fn session_info(
    State(store): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SessionInfoJson>>> {
    Ok(Json(
        store
            .sessions()?
            .iter()
            .filter(|s| s.id == id)
            .map(SessionInfoJson::from)
            .collect(),
    ))
}

async fn list_sessions(State(store): State<AppState>) -> ApiResult<Json<Vec<SessionInfoJson>>> {
    Ok(Json(
        store.sessions()?.iter().map(SessionInfoJson::from).collect(),
    ))
}

async fn get_key(
    State(store): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvGetQuery>,
) -> ApiResult<Response> {
    let entries = if flag_set(&query.recurse) {
        store.list_recursive(&key)?
    } else {
        validate_key(&key).map_err(bad_request)?;
        store.get(&key)?.into_iter().collect()
    };

    if entries.is_empty() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let pairs: Vec<KvPairJson> = entries.iter().map(KvPairJson::from).collect();
    Ok(Json(pairs).into_response())
}

async fn put_key(
    State(store): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvPutQuery>,
    body: Bytes,
) -> ApiResult<Json<bool>> {
    validate_key(&key).map_err(bad_request)?;

    let options = PutOptions {
        acquire: query.acquire.filter(|s| !s.is_empty()),
        cas: query.cas,
    };
    let written = store.put(&key, &body, &options)?;
    if !written {
        tracing::debug!(key = %key, acquire = ?options.acquire, cas = ?options.cas, "Conditional put rejected");
    }
    Ok(Json(written))
}

async fn delete_key(
    State(store): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvDeleteQuery>,
) -> ApiResult<Json<bool>> {
    if flag_set(&query.recurse) {
        for entry in store.list_recursive(&key)? {
            store.delete(&entry.key)?;
        }
    } else {
        validate_key(&key).map_err(bad_request)?;
        store.delete(&key)?;
    }
    Ok(Json(true))
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

fn create_store(storage: &str) -> AppState {
    if storage == "memory" {
        tracing::info!("Storage backend: in-memory (data will not persist)");
        Arc::new(InMemoryKvStore::new())
    } else if let Some(path) = storage.strip_prefix("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            tracing::info!("Storage backend: SQLite ({})", path);
            match kvsem_core::infrastructure_sqlite::SqliteKvStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::error!("Failed to open SQLite: {}. Falling back to in-memory.", e);
                    Arc::new(InMemoryKvStore::new())
                }
            }
        }
        #[cfg(not(feature = "sqlite"))]
        {
            tracing::error!(
                "SQLite storage requested but `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
            );
            tracing::warn!("Falling back to in-memory storage.");
            let _ = path;
            Arc::new(InMemoryKvStore::new())
        }
    } else {
        tracing::error!(
            "Unknown storage backend: '{}'. Use 'memory' or 'sqlite:<path>'",
            storage
        );
        tracing::warn!("Falling back to in-memory storage.");
        Arc::new(InMemoryKvStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::{router, AppState};
    use kvsem_core::config::SemaphoreConfig;
    use kvsem_core::infrastructure::KvStore;
    use kvsem_core::infrastructure_consul::ConsulKvStore;
    use kvsem_core::infrastructure_in_memory::InMemoryKvStore;
    use kvsem_core::semaphore::Semaphore;
    use kvsem_core::types::{PutOptions, ResourceDescriptor, SessionRequest};
    use std::sync::Arc;
    use std::time::Duration;

    /// Serves `store` on an ephemeral port and returns its address.
    async fn serve(store: InMemoryKvStore) -> String {
        let state: AppState = Arc::new(store);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_consul_client_round_trip() {
        let addr = serve(InMemoryKvStore::new()).await;

        tokio::task::spawn_blocking(move || {
            let client = ConsulKvStore::new(&addr);
            let s1 = client
                .create_session(&SessionRequest::new("a", Duration::from_secs(10)))
                .unwrap();
            let s2 = client
                .create_session(&SessionRequest::new("b", Duration::from_secs(10)))
                .unwrap();

            assert!(client.put("locks/db/x", b"v", &PutOptions::acquire(&s1)).unwrap());
            assert!(!client.put("locks/db/x", b"v", &PutOptions::acquire(&s2)).unwrap());
            assert!(client.put("locks/db/.m", b"1", &PutOptions::cas(0)).unwrap());
            assert!(!client.put("locks/db/.m", b"2", &PutOptions::cas(0)).unwrap());

            let listed = client.list_recursive("locks/db/").unwrap();
            let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
            assert_eq!(keys, vec!["locks/db/.m", "locks/db/x"]);
            assert_eq!(listed[1].session.as_deref(), Some(s1.as_str()));
            assert!(client.list_recursive("locks/none/").unwrap().is_empty());

            assert!(client.renew_session(&s1).unwrap());
            client.destroy_session(&s1).unwrap();
            assert!(!client.renew_session(&s1).unwrap());
            client.delete("locks/db/.m").unwrap();
            assert!(client.get("locks/db/.m").unwrap().is_none());
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_consul_client_keeps_url_syntax_inside_the_key() {
        let store = InMemoryKvStore::new();
        let addr = serve(store.clone()).await;

        tokio::task::spawn_blocking(move || {
            let config = SemaphoreConfig::new(
                vec![
                    ResourceDescriptor::new("db#1", 1, 1),
                    ResourceDescriptor::new("a?b", 1, 1),
                    ResourceDescriptor::new("50%", 1, 1),
                ],
                10,
                "locks",
            );
            let mut sem = Semaphore::new(ConsulKvStore::new(&addr), config).unwrap();
            assert!(sem.acquire().unwrap().is_success());
            let session_id = sem.session_id().unwrap().to_string();

            for resource in ["db#1", "a?b", "50%"] {
                let flag = format!("locks/{}/{}", resource, session_id);
                let entry = store.get(&flag).unwrap().unwrap();
                assert_eq!(entry.session.as_deref(), Some(session_id.as_str()));
                assert!(store.get(&format!("locks/{}/.semaphore", resource)).unwrap().is_some());
            }
            assert!(store.list_recursive("locks/db/").unwrap().is_empty());
            assert!(store.list_recursive("locks/a/").unwrap().is_empty());

            sem.release();
            assert!(store
                .list_recursive("locks/")
                .unwrap()
                .iter()
                .all(|e| e.session.is_none()));
        })
        .await
        .unwrap();
    }
}
