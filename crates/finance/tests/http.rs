use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use finance::config::Config;
use finance::server::router;
use finance::store::SqliteLedgerStore;
use quotes::FixedQuoteProvider;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app() -> Router {
    let config = Config::from_lookup(|key| match key {
        "API_KEY" => Some("test".to_string()),
        "JWT_SECRET" => Some("http-test-secret".to_string()),
        _ => None,
    })
    .unwrap();

    let store = Arc::new(SqliteLedgerStore::in_memory().await.unwrap());
    let quotes = Arc::new(FixedQuoteProvider::new().with_price("AAPL", "Apple Inc.", dec!(50)));
    router(finance::build_state(&config, store, quotes))
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn register_and_login(app: &Router) -> String {
    let (status, _) = call(
        app,
        post(
            "/register",
            None,
            json!({ "username": "alice", "password": "Passw0rd!", "confirmation": "Passw0rd!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        app,
        post(
            "/login",
            None,
            json!({ "username": "alice", "password": "Passw0rd!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_sets_no_cache_headers() {
    let app = app().await;
    let response = app.clone().oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );
}

#[tokio::test]
async fn test_trading_requires_token() {
    let app = app().await;

    let (status, body) = call(
        &app,
        post("/buy", None, json!({ "symbol": "AAPL", "shares": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = call(&app, get("/portfolio", Some("not-a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_validation() {
    let app = app().await;
    register_and_login(&app).await;

    let (status, body) = call(
        &app,
        post(
            "/register",
            None,
            json!({ "username": "alice", "password": "Passw0rd!", "confirmation": "Passw0rd!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UsernameTaken");

    let (status, body) = call(
        &app,
        post(
            "/register",
            None,
            json!({ "username": "bob", "password": "password", "confirmation": "password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "WeakPassword");

    let (status, body) = call(
        &app,
        post(
            "/login",
            None,
            json!({ "username": "alice", "password": "Wrong0ne!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "InvalidCredentials");
}

#[tokio::test]
async fn test_buy_portfolio_history_flow() {
    let app = app().await;
    let token = register_and_login(&app).await;

    let (status, body) = call(&app, get("/quote/aapl", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "AAPL");
    assert_eq!(body["price"], "50");

    let (status, body) = call(
        &app,
        post("/buy", Some(&token), json!({ "symbol": "aapl", "shares": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cash_after"], "9500");
    assert_eq!(body["shares_held"], 10);

    let (status, body) = call(
        &app,
        post("/sell", Some(&token), json!({ "symbol": "AAPL", "shares": 11 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InsufficientShares");

    let (status, body) = call(
        &app,
        post("/buy", Some(&token), json!({ "symbol": "AAPL" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");

    let (status, body) = call(&app, get("/portfolio", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cash"], "9500");
    assert_eq!(body["total"], "10000");
    assert_eq!(body["holdings"][0]["symbol"], "AAPL");
    assert_eq!(body["holdings"][0]["stale"], false);

    let (status, body) = call(&app, get("/history", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["status"], "buy");
    assert_eq!(entries[0]["share_count"], 10);
}

#[tokio::test]
async fn test_unknown_symbol_quote() {
    let app = app().await;
    let token = register_and_login(&app).await;

    let (status, body) = call(&app, get("/quote/ZZZZ", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UnknownSymbol");
}
