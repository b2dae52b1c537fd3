use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router, async_trait};
use interface::Quote;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AuthService, Session};
use crate::error::Error;
use crate::store::{HistoryEntry, UserId};
use crate::trading::{PortfolioView, TradeReceipt, TradingEngine};

pub struct AppState {
    pub auth: AuthService,
    pub engine: TradingEngine,
}

pub type SharedState = Arc<AppState>;

/// 검증된 토큰의 사용자
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(Error::Unauthorized)?;

        let claims = state.auth.authenticate(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            username: claims.username,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirmation: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    #[serde(default)]
    pub symbol: String,
    pub shares: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Error> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/quote/:symbol", get(quote))
        .route("/buy", post(buy))
        .route("/sell", post(sell))
        .route("/portfolio", get(portfolio))
        .route("/history", get(history))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(port: u16, state: SharedState) -> eyre::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API 서버 listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn register(
    State(state): State<SharedState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let req = body(payload)?;
    let user_id = state
        .auth
        .register(&req.username, &req.password, &req.confirmation)
        .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

async fn login(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Session>, Error> {
    let req = body(payload)?;
    let session = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(session))
}

async fn quote(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, Error> {
    Ok(Json(state.engine.quote(&symbol).await?))
}

async fn buy(
    State(state): State<SharedState>,
    user: AuthUser,
    payload: Result<Json<TradeRequest>, JsonRejection>,
) -> Result<Json<TradeReceipt>, Error> {
    let req = body(payload)?;
    let shares = req
        .shares
        .ok_or_else(|| Error::InvalidInput("must provide shares".to_string()))?;

    let receipt = state.engine.buy(user.user_id, &req.symbol, shares).await?;
    Ok(Json(receipt))
}

async fn sell(
    State(state): State<SharedState>,
    user: AuthUser,
    payload: Result<Json<TradeRequest>, JsonRejection>,
) -> Result<Json<TradeReceipt>, Error> {
    let req = body(payload)?;
    let shares = req
        .shares
        .ok_or_else(|| Error::InvalidInput("must provide shares".to_string()))?;

    let receipt = state.engine.sell(user.user_id, &req.symbol, shares).await?;
    Ok(Json(receipt))
}

async fn portfolio(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<PortfolioView>, Error> {
    Ok(Json(state.engine.valuate(user.user_id).await?))
}

async fn history(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<Json<Vec<HistoryEntry>>, Error> {
    Ok(Json(state.engine.history(user.user_id).await?))
}
