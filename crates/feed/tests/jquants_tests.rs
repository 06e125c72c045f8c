use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use kabu_core::common::time::FakeClockProvider;
use kabu_core::config::JQuantsConfig;
use kabu_core::market::error::MarketError;
use kabu_core::market::port::DailyQuoteSource;
use kabu_feed::jquants::{Credentials, JQuantsClient};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

#[derive(Default)]
struct MockVendor {
    auth_user_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    data_calls: AtomicUsize,
}

type Shared = Arc<MockVendor>;

async fn auth_user(State(s): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    s.auth_user_calls.fetch_add(1, Ordering::SeqCst);
    if body["mailaddress"] == "user@example.com" && body["password"] == "pw" {
        (StatusCode::OK, Json(json!({ "refreshToken": "rt-1" })))
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "message": "invalid credentials" })))
    }
}

async fn auth_refresh(
    State(s): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if q.get("refreshtoken").map(String::as_str) != Some("rt-1") {
        return (StatusCode::BAD_REQUEST, Json(json!({})));
    }
    let n = s.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    (StatusCode::OK, Json(json!({ "idToken": format!("id-{n}") })))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer id-"))
}

fn quote(date: &str, close: f64) -> Value {
    json!({
        "Date": date, "Code": "72030",
        "Open": close, "High": close, "Low": close, "Close": close,
        "Volume": 1000.0, "TurnoverValue": 1.0
    })
}

// 三页分页：无键 -> p2 -> p3 -> 结束
async fn daily_quotes(
    State(s): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    s.data_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token" })));
    }
    if q.get("code").map(String::as_str) == Some("13010") {
        return (StatusCode::OK, Json(cycling_page(&q)));
    }
    if q.get("code").map(String::as_str) != Some("72030") {
        return (StatusCode::OK, Json(json!({ "daily_quotes": [] })));
    }
    let body = match q.get("pagination_key").map(String::as_str) {
        None => json!({
            "daily_quotes": [quote("2024-01-04", 1.0), quote("2024-01-05", 2.0)],
            "pagination_key": "p2"
        }),
        Some("p2") => json!({
            "daily_quotes": [
                quote("2024-01-09", 3.0),
                { "Date": "2024-01-10", "Code": "72030", "Open": null, "High": null,
                  "Low": null, "Close": null, "Volume": null }
            ],
            "pagination_key": "p3"
        }),
        Some("p3") => json!({ "daily_quotes": [quote("2024-01-11", 4.0)] }),
        Some(_) => return (StatusCode::BAD_REQUEST, Json(json!({}))),
    };
    (StatusCode::OK, Json(body))
}

// 键循环的分页：无键 -> p2 -> p3 -> p2 -> ...
fn cycling_page(q: &HashMap<String, String>) -> Value {
    let (date, next) = match q.get("pagination_key").map(String::as_str) {
        None => ("2024-01-04", "p2"),
        Some("p2") => ("2024-01-05", "p3"),
        _ => ("2024-01-09", "p2"),
    };
    let mut row = quote(date, 1.0);
    row["Code"] = json!("13010");
    json!({ "daily_quotes": [row], "pagination_key": next })
}

async fn listed_info(State(s): State<Shared>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    s.data_calls.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    (
        StatusCode::OK,
        Json(json!({ "info": [{
            "Date": "2024-01-04", "Code": "72030",
            "CompanyName": "トヨタ自動車", "CompanyNameEnglish": "TOYOTA MOTOR CORPORATION",
            "Sector17Code": "6", "Sector17CodeName": "自動車・輸送機",
            "Sector33Code": "3700", "Sector33CodeName": "輸送用機器",
            "ScaleCategory": "TOPIX Core30", "MarketCode": "0111", "MarketCodeName": "プライム",
            "MarginCode": "1"
        }]})),
    )
}

async fn announcement(State(s): State<Shared>) -> (StatusCode, Json<Value>) {
    s.data_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "boom" })))
}

async fn trading_calendar(State(s): State<Shared>) -> Json<Value> {
    s.data_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "trading_calendar": [
        { "Date": "2024-01-01", "HolidayDivision": "0" },
        { "Date": "2024-01-04", "HolidayDivision": "1" }
    ]}))
}

async fn statements(State(s): State<Shared>) -> Json<Value> {
    s.data_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "statements": [
        { "DisclosedDate": "2024-02-06", "LocalCode": "72030", "NetSales": "1000" }
    ]}))
}

fn init_crypto() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        // 其他测试已安装
    }
}

// 在随机端口启动模拟的 J-Quants 服务
async fn spawn_vendor() -> (String, Shared) {
    init_crypto();
    let state: Shared = Arc::new(MockVendor::default());
    let app = Router::new()
        .route("/v1/token/auth_user", post(auth_user))
        .route("/v1/token/auth_refresh", post(auth_refresh))
        .route("/v1/prices/daily_quotes", get(daily_quotes))
        .route("/v1/listed/info", get(listed_info))
        .route("/v1/fins/announcement", get(announcement))
        .route("/v1/fins/statements", get(statements))
        .route("/v1/markets/trading_calendar", get(trading_calendar))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn config(base_url: &str) -> JQuantsConfig {
    JQuantsConfig {
        base_url: base_url.to_string(),
        ..JQuantsConfig::default()
    }
}

fn good_credentials() -> Option<Credentials> {
    Some(Credentials::new("user@example.com", "pw"))
}

#[tokio::test]
async fn test_pagination_concatenates_pages_in_order() {
    let (addr, vendor) = spawn_vendor().await;
    let client = JQuantsClient::new(&config(&addr), good_credentials()).unwrap();

    let bars = client.daily_quotes("7203", None, None).await;

    // 三页共 5 条，停牌日被丢弃
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(bars[2].date, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    assert_eq!(vendor.data_calls.load(Ordering::SeqCst), 3);
    assert_eq!(vendor.auth_user_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_credentials_disable_without_network() {
    let (addr, vendor) = spawn_vendor().await;
    let client = JQuantsClient::new(&config(&addr), None).unwrap();

    assert!(!client.is_enabled());
    assert!(client.daily_quotes("7203", None, None).await.is_empty());
    assert!(client.listed_info(None, None).await.is_empty());
    assert_eq!(
        client.fetch_daily("7203", None, None).await,
        Err(MarketError::Disabled)
    );
    assert_eq!(vendor.auth_user_calls.load(Ordering::SeqCst), 0);
    assert_eq!(vendor.data_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_login_disables_for_process() {
    let (addr, vendor) = spawn_vendor().await;
    let client =
        JQuantsClient::new(&config(&addr), Some(Credentials::new("user@example.com", "wrong")))
            .unwrap();

    assert!(client.is_enabled());
    assert!(!client.login().await);
    assert!(!client.is_enabled());

    // 进入 Disabled 后不再发起任何请求
    assert!(client.daily_quotes("7203", None, None).await.is_empty());
    assert_eq!(vendor.auth_user_calls.load(Ordering::SeqCst), 1);
    assert_eq!(vendor.data_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_expired_token_refreshes_once_under_concurrency() {
    let (addr, vendor) = spawn_vendor().await;
    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2024, 1, 4, 9, 0, 0).unwrap(),
    ));
    let client = JQuantsClient::new(&config(&addr), good_credentials())
        .unwrap()
        .with_clock(clock.clone());

    assert!(client.login().await);
    assert_eq!(vendor.refresh_calls.load(Ordering::SeqCst), 1);

    // 窗口内不刷新
    clock.advance(Duration::hours(23));
    client.listed_info(None, None).await;
    assert_eq!(vendor.refresh_calls.load(Ordering::SeqCst), 1);

    // 过期后多个调用方同时到达，只刷新一次
    clock.advance(Duration::hours(2));
    let calls = (0..5).map(|_| client.listed_info(Some("7203"), None));
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.len() == 1));
    assert_eq!(vendor.refresh_calls.load(Ordering::SeqCst), 2);
    assert_eq!(vendor.auth_user_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_success_status_yields_empty() {
    let (addr, _vendor) = spawn_vendor().await;
    let client = JQuantsClient::new(&config(&addr), good_credentials()).unwrap();

    assert!(client.announcement().await.is_empty());
    assert_eq!(
        client.try_announcement().await,
        Err(MarketError::Status(500))
    );
    // 会话不受单次接口错误影响
    assert!(client.is_enabled());
}

#[tokio::test]
async fn test_typed_and_loose_endpoints() {
    let (addr, _vendor) = spawn_vendor().await;
    let client = JQuantsClient::new(&config(&addr), good_credentials()).unwrap();

    let listed = client.listed_info(Some("7203"), None).await;
    assert_eq!(listed[0].code, "72030");
    assert_eq!(listed[0].sector33_code_name, "輸送用機器");

    let calendar = client.trading_calendar(None, None, None).await;
    assert_eq!(calendar.len(), 2);
    assert_eq!(calendar[1].holiday_division, "1");

    let statements = client.statements(Some("7203"), None, None, None).await;
    assert_eq!(statements[0]["NetSales"], "1000");
}

#[tokio::test]
async fn test_cycling_pagination_keys_terminate() {
    let (addr, vendor) = spawn_vendor().await;
    let client = JQuantsClient::new(&config(&addr), good_credentials()).unwrap();

    let bars = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.daily_quotes("1301", None, None),
    )
    .await
    .unwrap();

    // p3 再次返回 p2 时停止，已取得的三页保留
    assert_eq!(bars.len(), 3);
    assert_eq!(bars[2].date, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    assert_eq!(vendor.data_calls.load(Ordering::SeqCst), 3);
}
