//! VaporKV client: encrypts keys and values with a shared secret before
//! they ever reach the wire, and decrypts what comes back.

use uuid::Uuid;
use vaporkv_common::{
    ErrorResponse, PutResponse, RecordResponse, Result, VaporKvError, MAX_DATA_SIZE,
};

pub mod envelope;

/// Pointer literal for the newest stored version.
pub const NEWEST: &str = "NEWEST";
/// Pointer literal for the oldest stored version.
pub const OLDEST: &str = "OLDEST";

/// How long the server is asked to hold a long-polled GET open (seconds).
const WAIT_TIMEOUT_SECS: u64 = 60;

/// VaporKV Client
pub struct Client {
    server: String,
    key: [u8; envelope::BLOCK_SIZE],
    http: reqwest::Client,
}

impl Client {
    /// Create a client for `server` (e.g. `http://127.0.0.1:8888`) sharing
    /// `secret` with its peers.
    pub fn new(server: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            server: server.into(),
            key: envelope::derive_key(secret),
            http: reqwest::Client::new(),
        }
    }

    /// Build the URL for a record operation.
    pub fn build_record_url(&self, record_id: &str, record_version: &str) -> String {
        format!("{}/rec/{}/{}", self.server, record_id, record_version)
    }

    /// Store a new version under the given key; returns the assigned version.
    pub async fn put(&self, user_key: &[u8], value: &[u8]) -> Result<u64> {
        let record_id = envelope::record_id(&self.key, user_key);
        let data = envelope::seal(&self.key, value);
        if data.len() > MAX_DATA_SIZE {
            return Err(VaporKvError::ValueTooLarge(data.len(), MAX_DATA_SIZE));
        }

        let url = self.build_record_url(&record_id, NEWEST);
        let response = self
            .http
            .post(&url)
            .form(&[("idepo", Uuid::new_v4().to_string()), ("data", data)])
            .send()
            .await
            .map_err(|e| VaporKvError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(status, &record_id, response).await);
        }

        let body: PutResponse = response
            .json()
            .await
            .map_err(|e| VaporKvError::MalformedResponse(e.to_string()))?;
        Ok(body.record_version)
    }

    /// Value stored under the given key and version. With `wait` the request
    /// long-polls until that version is written.
    pub async fn get(&self, user_key: &[u8], version: u64, wait: bool) -> Result<Vec<u8>> {
        let (_, value) = self.get_record(user_key, &version.to_string(), wait).await?;
        Ok(value)
    }

    /// Newest stored version and its value. With `wait` the request
    /// long-polls until a first version exists.
    pub async fn get_newest(&self, user_key: &[u8], wait: bool) -> Result<(u64, Vec<u8>)> {
        self.get_record(user_key, NEWEST, wait).await
    }

    /// Oldest stored version and its value. With `wait` the request
    /// long-polls until a first version exists.
    pub async fn get_oldest(&self, user_key: &[u8], wait: bool) -> Result<(u64, Vec<u8>)> {
        self.get_record(user_key, OLDEST, wait).await
    }

    async fn get_record(&self, user_key: &[u8], version: &str, wait: bool) -> Result<(u64, Vec<u8>)> {
        let record_id = envelope::record_id(&self.key, user_key);

        // A long-poll can expire without the record appearing; keep asking
        // until it does. Dropping the future abandons the wait.
        loop {
            match self.get_request(&record_id, version, wait).await {
                Ok(response) => {
                    let value = envelope::open(&self.key, &response.value)?;
                    return Ok((response.record_version, value));
                }
                Err(VaporKvError::RecordNotFound(_)) if wait => continue,
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_request(&self, record_id: &str, version: &str, wait: bool) -> Result<RecordResponse> {
        let mut request = self.http.get(self.build_record_url(record_id, version));
        if wait {
            request = request.query(&[("timeout", WAIT_TIMEOUT_SECS.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaporKvError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(status, record_id, response).await);
        }
        response
            .json::<RecordResponse>()
            .await
            .map_err(|e| VaporKvError::MalformedResponse(e.to_string()))
    }
}

async fn parse_error_response(
    status: reqwest::StatusCode,
    record_id: &str,
    response: reqwest::Response,
) -> VaporKvError {
    if status == reqwest::StatusCode::NOT_FOUND {
        return VaporKvError::RecordNotFound(record_id.to_string());
    }

    let error_msg = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("Server returned status: {}", status));

    VaporKvError::HttpError(status.as_u16(), error_msg)
}
