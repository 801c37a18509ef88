use vaporkv_client::{envelope, Client};
use vaporkv_common::{VaporKvError, MAX_DATA_SIZE};

// --- Test helpers ---

const SECRET: &[u8] = b"a shared secret";

fn test_key() -> [u8; 16] {
    envelope::derive_key(SECRET)
}

fn client_for(server_url: &str) -> Client {
    Client::new(server_url.to_string(), SECRET)
}

/// A client pointed at an unbound port, for tests that must not connect.
fn unreachable_client() -> Client {
    Client::new("http://127.0.0.1:59210", SECRET)
}

fn record_response_json(record_id: &str, record_version: u64, value: &str) -> String {
    format!(r#"{{"record_id":"{record_id}","record_version":{record_version},"value":"{value}"}}"#)
}

// --- Envelope: key derivation and record ids ---

#[test]
fn test_derive_key_is_deterministic() {
    assert_eq!(envelope::derive_key(SECRET), envelope::derive_key(SECRET));
    assert_ne!(envelope::derive_key(SECRET), envelope::derive_key(b"other secret"));
}

#[test]
fn test_record_id_shape() {
    let id = envelope::record_id(&test_key(), b"user key");
    assert_eq!(id.len(), 40, "HMAC-SHA1 hex digest is 40 characters");
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
}

#[test]
fn test_record_id_is_deterministic_per_key_and_secret() {
    let key = test_key();
    assert_eq!(envelope::record_id(&key, b"user key"), envelope::record_id(&key, b"user key"));
    assert_ne!(envelope::record_id(&key, b"user key"), envelope::record_id(&key, b"other key"));

    let other = envelope::derive_key(b"other secret");
    assert_ne!(envelope::record_id(&key, b"user key"), envelope::record_id(&other, b"user key"));
}

// --- Envelope: seal and open ---

#[test]
fn test_seal_open_round_trip() {
    let key = test_key();
    let sealed = envelope::seal(&key, b"attack at dawn");
    assert_eq!(envelope::open(&key, &sealed).unwrap(), b"attack at dawn");
}

#[test]
fn test_seal_open_empty_value() {
    let key = test_key();
    let sealed = envelope::seal(&key, b"");
    assert_eq!(envelope::open(&key, &sealed).unwrap(), b"");
}

#[test]
fn test_seal_uses_a_fresh_iv() {
    // Two seals of the same plaintext differ on the wire but both open.
    let key = test_key();
    let first = envelope::seal(&key, b"value");
    let second = envelope::seal(&key, b"value");
    assert_ne!(first, second);
    assert_eq!(envelope::open(&key, &first).unwrap(), b"value");
    assert_eq!(envelope::open(&key, &second).unwrap(), b"value");
}

#[test]
fn test_open_with_wrong_secret_fails() {
    let sealed = envelope::seal(&test_key(), b"value");
    let wrong = envelope::derive_key(b"wrong secret");
    assert!(matches!(
        envelope::open(&wrong, &sealed),
        Err(VaporKvError::DecryptionFailed(_))
    ));
}

#[test]
fn test_open_tampered_ciphertext_fails() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let key = test_key();
    let sealed = envelope::seal(&key, b"value");
    let mut binary = STANDARD.decode(&sealed).unwrap();
    // Flip one bit in the first ciphertext block (after the 16-byte IV).
    binary[16] ^= 0x01;
    let tampered = STANDARD.encode(binary);

    assert!(matches!(
        envelope::open(&key, &tampered),
        Err(VaporKvError::DecryptionFailed(_))
    ));
}

#[test]
fn test_open_rejects_malformed_input() {
    let key = test_key();
    // Not base64 at all.
    assert!(envelope::open(&key, "%%%").is_err());
    // Shorter than one IV.
    assert!(envelope::open(&key, "AAAA").is_err());
    // IV present but ciphertext not block-aligned.
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    assert!(envelope::open(&key, &STANDARD.encode([0u8; 23])).is_err());
    // IV present but no ciphertext at all.
    assert!(envelope::open(&key, &STANDARD.encode([0u8; 16])).is_err());
}

// --- Client: URLs ---

#[test]
fn test_build_record_url() {
    let client = Client::new("http://127.0.0.1:8888", SECRET);
    assert_eq!(
        client.build_record_url("a1b2", "NEWEST"),
        "http://127.0.0.1:8888/rec/a1b2/NEWEST"
    );
    assert_eq!(client.build_record_url("a1b2", "3"), "http://127.0.0.1:8888/rec/a1b2/3");
}

// --- Client: put ---

#[tokio::test]
async fn test_put_returns_version_from_response() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("POST", format!("/rec/{record_id}/NEWEST").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(format!(r#"{{"record_id":"{record_id}","record_version":3}}"#))
        .create_async()
        .await;

    let client = client_for(&server.url());
    assert_eq!(client.put(b"user key", b"value").await.unwrap(), 3);
}

#[tokio::test]
async fn test_put_surfaces_server_errors() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("POST", format!("/rec/{record_id}/NEWEST").as_str())
        .with_status(503)
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"error":"record table is full (1048576 records); retry once some are evicted"}"#)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.put(b"user key", b"value").await;
    assert!(matches!(result, Err(VaporKvError::HttpError(503, _))));
}

#[tokio::test]
async fn test_put_rejects_oversized_sealed_value_without_contacting_server() {
    // Random bytes do not compress, so the sealed form exceeds the record
    // limit. The pre-flight check must fire before any connection attempt.
    let client = unreachable_client();
    let value: Vec<u8> = (0..4 * MAX_DATA_SIZE).map(|_| rand::random::<u8>()).collect();
    let result = client.put(b"user key", &value).await;
    assert!(matches!(result, Err(VaporKvError::ValueTooLarge(_, MAX_DATA_SIZE))));
}

#[tokio::test]
async fn test_put_returns_network_error_when_server_unreachable() {
    let client = unreachable_client();
    let result = client.put(b"user key", b"value").await;
    assert!(matches!(result, Err(VaporKvError::NetworkError(_))));
}

// --- Client: get ---

#[tokio::test]
async fn test_get_decrypts_stored_value() {
    let mut server = mockito::Server::new_async().await;
    let key = test_key();
    let record_id = envelope::record_id(&key, b"user key");
    let sealed = envelope::seal(&key, b"plaintext");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(record_response_json(&record_id, 1, &sealed))
        .create_async()
        .await;

    let client = client_for(&server.url());
    assert_eq!(client.get(b"user key", 1, false).await.unwrap(), b"plaintext");
}

#[tokio::test]
async fn test_get_newest_returns_version_and_value() {
    let mut server = mockito::Server::new_async().await;
    let key = test_key();
    let record_id = envelope::record_id(&key, b"user key");
    let sealed = envelope::seal(&key, b"latest");
    server
        .mock("GET", format!("/rec/{record_id}/NEWEST").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(record_response_json(&record_id, 7, &sealed))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let (version, value) = client.get_newest(b"user key", false).await.unwrap();
    assert_eq!(version, 7);
    assert_eq!(value, b"latest");
}

#[tokio::test]
async fn test_get_oldest_returns_version_and_value() {
    let mut server = mockito::Server::new_async().await;
    let key = test_key();
    let record_id = envelope::record_id(&key, b"user key");
    let sealed = envelope::seal(&key, b"first");
    server
        .mock("GET", format!("/rec/{record_id}/OLDEST").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(record_response_json(&record_id, 1, &sealed))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let (version, value) = client.get_oldest(b"user key", false).await.unwrap();
    assert_eq!(version, 1);
    assert_eq!(value, b"first");
}

#[tokio::test]
async fn test_get_returns_record_not_found_on_404() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .with_status(404)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.get(b"user key", 1, false).await;
    assert!(matches!(result, Err(VaporKvError::RecordNotFound(id)) if id == record_id));
}

#[tokio::test]
async fn test_get_with_undecryptable_value_fails() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(record_response_json(&record_id, 1, "bm90IGEgdmFsaWQgZW52ZWxvcGU"))
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.get(b"user key", 1, false).await;
    assert!(matches!(result, Err(VaporKvError::DecryptionFailed(_))));
}

#[tokio::test]
async fn test_get_with_malformed_body_fails() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body("not json")
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.get(b"user key", 1, false).await;
    assert!(matches!(result, Err(VaporKvError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_get_with_wait_sends_timeout_parameter() {
    let mut server = mockito::Server::new_async().await;
    let key = test_key();
    let record_id = envelope::record_id(&key, b"user key");
    let sealed = envelope::seal(&key, b"value");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .match_query(mockito::Matcher::UrlEncoded("timeout".into(), "60".into()))
        .with_status(200)
        .with_header("Content-Type", "application/json")
        .with_body(record_response_json(&record_id, 1, &sealed))
        .create_async()
        .await;

    let client = client_for(&server.url());
    assert_eq!(client.get(b"user key", 1, true).await.unwrap(), b"value");
}

#[tokio::test]
async fn test_get_surfaces_bad_request_as_http_error() {
    let mut server = mockito::Server::new_async().await;
    let record_id = envelope::record_id(&test_key(), b"user key");
    server
        .mock("GET", format!("/rec/{record_id}/1").as_str())
        .with_status(400)
        .with_header("Content-Type", "application/json")
        .with_body(r#"{"error":"timeout must be a non-negative integer"}"#)
        .create_async()
        .await;

    let client = client_for(&server.url());
    let result = client.get(b"user key", 1, false).await;
    assert!(
        matches!(result, Err(VaporKvError::HttpError(400, ref msg)) if msg == "timeout must be a non-negative integer")
    );
}
