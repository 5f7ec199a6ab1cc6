// Session transport tests against a wiremock PVS.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{basic_auth, header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

use pvs_rs::api::endpoint::{VARS_MATCH_INVERTERS, VAR_UPTIME};
use pvs_rs::{Credentials, Error, PvsClient};

const SERIAL: &str = "ZT192585000549A1072";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, PvsClient) {
    let server = MockServer::start().await;
    let credentials = Credentials::for_serial("ssm_owner", SERIAL).unwrap();
    let client = PvsClient::new(&server.uri(), credentials, Duration::from_secs(5)).unwrap();
    (server, client)
}

fn login() -> MockBuilder {
    Mock::given(method("GET"))
        .and(path("/auth"))
        .and(query_param("login", ""))
        .and(basic_auth("ssm_owner", "A1072"))
}

fn session_cookie(name: &str, value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("{}={}; Path=/; HttpOnly", name, value).as_str())
}

fn vars_match(prefix: &str) -> MockBuilder {
    Mock::given(method("POST"))
        .and(path("/vars"))
        .and(query_param("match", prefix))
        .and(query_param("fmt", "obj"))
}

fn inverters_body() -> serde_json::Value {
    json!({
        "/sys/devices/inverter/0": {
            "sn": "E00122142080335",
            "prodMdlNm": "AC_Module_Type_E",
            "msmtEps": "2024-09-30T16:15:00Z",
            "p3phsumKw": 0.2328
        }
    })
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn login_stores_session_cookie() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.last_auth_time().await.is_none());
    client.login().await.unwrap();

    let cookies = client.cookies().await;
    assert_eq!(1, cookies.len());
    assert_eq!(Some("abc"), cookies.get("session").map(String::as_str));
    assert!(client.last_auth_time().await.is_some());
}

#[tokio::test]
async fn second_login_replaces_cookie_entirely() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("legacy", "one"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    login()
        .respond_with(session_cookie("session", "two"))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    assert!(client.cookies().await.contains_key("legacy"));

    client.login().await.unwrap();
    let cookies = client.cookies().await;
    assert_eq!(1, cookies.len());
    assert_eq!(Some("two"), cookies.get("session").map(String::as_str));
    assert!(!cookies.contains_key("legacy"));
}

#[tokio::test]
async fn rejected_login_is_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let result = client.login().await;
    assert!(
        matches!(result, Err(Error::Authentication(_))),
        "expected Authentication error, got: {:?}",
        result
    );
    assert!(client.cookies().await.is_empty());
}

#[tokio::test]
async fn login_without_cookie_is_authentication_error() {
    let (server, client) = setup().await;

    login()
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert!(matches!(client.login().await, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn logout_forgets_session() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .and(query_param("logout", ""))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    client.logout().await.unwrap();
    assert!(client.cookies().await.is_empty());
}

// ── Re-authentication ───────────────────────────────────────────────

#[tokio::test]
async fn first_request_logs_in() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(inverters_body()))
        .expect(2)
        .mount(&server)
        .await;

    client.match_vars(VARS_MATCH_INVERTERS).await.unwrap();
    client.match_vars(VARS_MATCH_INVERTERS).await.unwrap();
}

#[tokio::test]
async fn expired_session_logs_in_once_and_retries_once() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "old"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    login()
        .respond_with(session_cookie("session", "new"))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(inverters_body()))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let records = client.match_vars(VARS_MATCH_INVERTERS).await.unwrap();

    assert_eq!(1, records.len());
    assert_eq!(
        Some("new"),
        client.cookies().await.get("session").map(String::as_str)
    );
}

#[tokio::test]
async fn not_logged_in_payload_triggers_login() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "old"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    login()
        .respond_with(session_cookie("session", "new"))
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "Not logged in"})))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(inverters_body()))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    assert!(client.match_vars(VARS_MATCH_INVERTERS).await.is_ok());
}

#[tokio::test]
async fn second_rejection_after_login_is_surfaced() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .expect(2)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let result = client.match_vars(VARS_MATCH_INVERTERS).await;
    assert!(
        matches!(result, Err(Error::Authentication(_))),
        "expected Authentication error, got: {:?}",
        result
    );
}

#[tokio::test]
async fn rejection_right_after_first_login_is_surfaced() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.match_vars(VARS_MATCH_INVERTERS).await;
    assert!(matches!(result, Err(Error::Authentication(_))));
}

#[tokio::test]
async fn cancelled_retry_keeps_new_session() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "old"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    login()
        .respond_with(session_cookie("session", "new"))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=new"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(inverters_body())
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .and(header("cookie", "session=new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(inverters_body()))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        client.match_vars(VARS_MATCH_INVERTERS),
    )
    .await;
    assert!(cancelled.is_err(), "retry should still be in flight");
    assert_eq!(
        Some("new"),
        client.cookies().await.get("session").map(String::as_str)
    );

    let records = client.match_vars(VARS_MATCH_INVERTERS).await.unwrap();
    assert_eq!(1, records.len());
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_body_is_decoding_error_and_keeps_cookie() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .expect(1)
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>busy</body>"))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let before = client.cookies().await;

    let result = client.match_vars(VARS_MATCH_INVERTERS).await;
    assert!(
        matches!(result, Err(Error::Decoding { .. })),
        "expected Decoding error, got: {:?}",
        result
    );
    assert_eq!(before, client.cookies().await);
}

#[tokio::test]
async fn server_error_is_protocol_error() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .mount(&server)
        .await;
    vars_match(VARS_MATCH_INVERTERS)
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    match client.match_vars(VARS_MATCH_INVERTERS).await {
        Err(Error::Protocol { status, path }) => {
            assert_eq!(500, status);
            assert_eq!(VARS_MATCH_INVERTERS, path);
        }
        other => panic!("expected Protocol error, got: {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_host_is_connectivity_error() {
    let credentials = Credentials::for_serial("ssm_owner", SERIAL).unwrap();
    let client = PvsClient::new("127.0.0.1:9", credentials, Duration::from_secs(2)).unwrap();

    let result = client.match_vars(VARS_MATCH_INVERTERS).await;
    assert!(
        matches!(result, Err(Error::Connectivity(_))),
        "expected Connectivity error, got: {:?}",
        result
    );
}

// ── Variables ───────────────────────────────────────────────────────

#[tokio::test]
async fn get_single_variable() {
    let (server, client) = setup().await;

    login()
        .respond_with(session_cookie("session", "abc"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/vars"))
        .and(query_param("name", VAR_UPTIME))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "values": [{"name": "/sys/info/uptime", "value": "3618"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(json!("3618"), client.get_var(VAR_UPTIME).await.unwrap());
}
