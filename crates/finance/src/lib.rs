use std::sync::Arc;

use quotes::QuoteProvider;
use tracing::warn;

pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logger;
pub mod server;
pub mod store;
pub mod trading;

use auth::{AuthService, TokenIssuer};
use config::Config;
use server::{AppState, SharedState};
use store::{LedgerStore, SqliteLedgerStore, StoreError};
use trading::TradingEngine;

// 라이브러리 로드 시 .env 자동 로드
#[ctor::ctor]
fn load_dotenv() {
    dotenv::dotenv().ok();
}

/// 저장소와 시세 제공자로 서버 상태 구성
pub fn build_state(
    config: &Config,
    store: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteProvider>,
) -> SharedState {
    let tokens = match &config.jwt_secret {
        Some(secret) => TokenIssuer::new(secret.as_bytes(), config.token_ttl_secs),
        None => {
            warn!("JWT_SECRET not set; using a per-process key (sessions end on restart)");
            TokenIssuer::ephemeral(config.token_ttl_secs)
        }
    };

    Arc::new(AppState {
        auth: AuthService::new(store.clone(), tokens, config.starting_cash),
        engine: TradingEngine::new(store, quotes),
    })
}

/// 설정의 DB 경로로 SQLite 저장소 열기
pub async fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>, StoreError> {
    let store = SqliteLedgerStore::open(&config.db_path, config.db_max_connections).await?;
    Ok(Arc::new(store))
}
