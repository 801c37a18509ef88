//! HTTP front end for the record engine.
//!
//! One resource, two methods: `GET /rec/{record_id}/{record_version}` reads
//! a record (the version may be a decimal integer or the pointer literals
//! `OLDEST` / `NEWEST`, optionally long-polling via `?timeout=secs`), and
//! `POST /rec/{record_id}/NEWEST` appends a new version.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{rejection::FormRejection, ConnectInfo, Form, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::RwLock;

use vaporkv_common::{ErrorResponse, PutResponse, RecordResponse};

pub mod config;
pub mod list;
pub mod store;
pub mod wait;

use config::MAX_TIMEOUT_SECS;
use store::{RecordStore, StoreConfig, StoreError};
use wait::{Wait, WaitStore};

const OLDEST: &str = "OLDEST";
const NEWEST: &str = "NEWEST";

/// Abstraction over current time for testability.
pub trait Clock: Send + Sync {
    fn unix_now_secs(&self) -> u64;
}

/// Production clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

pub type Db = Arc<RwLock<WaitStore>>;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(clock: Arc<dyn Clock>, store: StoreConfig) -> Self {
        Self {
            db: Arc::new(RwLock::new(WaitStore::new(RecordStore::new(store)))),
            clock,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub store: StoreConfig,
}

/// VaporKV Server
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Create the application router with the given state
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/rec/:record_id/:record_version", get(handle_get).post(handle_post))
            .with_state(state)
    }

    /// Run the server, signalling `ready_tx` with the bound address once accepting connections
    pub async fn run(self, ready_tx: tokio::sync::oneshot::Sender<SocketAddr>) -> Result<(), Box<dyn std::error::Error>> {
        let state = AppState::new(Arc::new(SystemClock), self.config.store.clone());
        let app = Self::create_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listening");
        ready_tx.send(local_addr).ok();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        Ok(())
    }
}

/// Form body of a POST: the idempotency token and the opaque payload.
#[derive(Debug, Deserialize)]
pub struct PutForm {
    pub idepo: String,
    pub data: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

/// Record ids are confined to the URL-safe alphabet the routing contract
/// accepts; anything else never names a record and is a routing miss.
fn valid_record_id(record_id: &str) -> bool {
    !record_id.is_empty()
        && record_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Every response carries the client address, errors included.
fn stamp_request_from(mut response: Response, remote: SocketAddr) -> Response {
    let value = HeaderValue::from_str(&remote.ip().to_string())
        .expect("IP addresses are valid header values");
    response.headers_mut().insert("x-request-from", value);
    response
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::IdTooLarge(_)
        | StoreError::TokenTooLarge(_)
        | StoreError::DataTooLarge(_)
        | StoreError::InvalidVersion => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::Capacity(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        StoreError::List(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Clamp the `timeout` query parameter to `[0, MAX_TIMEOUT_SECS]`; absent
/// means no waiting at all.
fn parse_timeout(params: &HashMap<String, String>) -> Result<u64, Response> {
    match params.get("timeout") {
        None => Ok(0),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) => Ok(secs.min(MAX_TIMEOUT_SECS)),
            Err(_) => Err(error_response(
                StatusCode::BAD_REQUEST,
                "timeout must be a non-negative integer",
            )),
        },
    }
}

/// The engine's dual read paths: `timeout == 0` consults the store
/// synchronously; otherwise the wait future is raced against the wall clock
/// and expiry resolves to `None`.
async fn resolve<T, SyncOp, WaitOp>(
    db: &Db,
    timeout_secs: u64,
    sync_op: SyncOp,
    wait_op: WaitOp,
) -> Result<Option<T>, StoreError>
where
    T: Clone,
    SyncOp: FnOnce(&mut WaitStore) -> Result<Option<T>, StoreError>,
    WaitOp: FnOnce(&mut WaitStore) -> Result<Wait<T>, StoreError>,
{
    if timeout_secs == 0 {
        let mut store = db.write().await;
        return sync_op(&mut store);
    }
    // Register (or resolve) under the lock; wait strictly outside it.
    let wait = {
        let mut store = db.write().await;
        wait_op(&mut store)?
    };
    match tokio::time::timeout(Duration::from_secs(timeout_secs), wait.wait()).await {
        Ok(value) => Ok(Some(value)),
        Err(_elapsed) => Ok(None),
    }
}

/// Handler for GET /rec/:record_id/:record_version.
pub async fn handle_get(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path((record_id, record_version)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    stamp_request_from(get_record(state, record_id, record_version, params).await, remote)
}

async fn get_record(
    state: AppState,
    record_id: String,
    record_version: String,
    params: HashMap<String, String>,
) -> Response {
    if !valid_record_id(&record_id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let timeout_secs = match parse_timeout(&params) {
        Ok(secs) => secs,
        Err(response) => return response,
    };
    let now = state.clock.unix_now_secs();

    let resolved = match record_version.as_str() {
        OLDEST => resolve(
            &state.db,
            timeout_secs,
            |store| store.oldest_version(&record_id, now),
            |store| store.oldest_wait(&record_id, now),
        )
        .await,
        NEWEST => resolve(
            &state.db,
            timeout_secs,
            |store| store.newest_version(&record_id, now),
            |store| store.newest_wait(&record_id, now),
        )
        .await,
        raw => match raw.parse::<u64>() {
            Ok(version) => Ok(Some(version)),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "record version must be a decimal integer, OLDEST, or NEWEST",
                )
            }
        },
    };

    let record_version = match resolved {
        Ok(Some(version)) => version,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => return store_error_response(err),
    };

    let data = resolve(
        &state.db,
        timeout_secs,
        |store| store.get(&record_id, record_version, now),
        |store| store.get_wait(&record_id, record_version, now),
    )
    .await;

    match data {
        Ok(Some(data)) => Json(RecordResponse {
            record_id,
            record_version,
            value: String::from_utf8_lossy(&data).into_owned(),
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

/// Handler for POST /rec/:record_id/:record_version — only NEWEST accepts
/// writes; the form body carries the idempotency token and the payload.
pub async fn handle_post(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path((record_id, record_version)): Path<(String, String)>,
    form: Result<Form<PutForm>, FormRejection>,
) -> Response {
    stamp_request_from(post_record(state, record_id, record_version, form).await, remote)
}

async fn post_record(
    state: AppState,
    record_id: String,
    record_version: String,
    form: Result<Form<PutForm>, FormRejection>,
) -> Response {
    if !valid_record_id(&record_id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if record_version != NEWEST {
        return error_response(StatusCode::BAD_REQUEST, "records can only be posted as NEWEST");
    }
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.to_string()),
    };

    let now = state.clock.unix_now_secs();
    let result = {
        let mut store = state.db.write().await;
        store.put(&record_id, &form.idepo, Bytes::from(form.data.into_bytes()), now)
    };

    match result {
        Ok(record_version) => Json(PutResponse { record_id, record_version }).into_response(),
        Err(err) => store_error_response(err),
    }
}
