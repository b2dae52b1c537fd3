use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::str::FromStr;

use crate::ledger::{LedgerError, Position, TradeSide};

pub type UserId = i64;

/// 사용자 계정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// 직렬화 대상에서 제외 (응답에 해시가 노출되지 않도록)
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub cash: Decimal,
}

/// 사용자별 종목 보유 현황
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: String,
    pub share_count: i64,
    /// 평균 원가 기준 누적 취득 원가
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Holding {
    pub fn position(&self) -> Position {
        Position {
            share_count: self.share_count,
            total_cost: self.total_cost,
        }
    }
}

/// 체결 내역 (추가 전용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: String,
    pub share_count: i64,
    pub price: Decimal,
    pub status: TradeSide,
    pub timestamp: DateTime<Utc>,
}

/// 장부에 반영할 체결 요청. 가격은 이미 조회된 값이다.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub user_id: UserId,
    pub side: TradeSide,
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// 체결 반영 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub amount: Decimal,
    pub cash_after: Decimal,
    /// 전량 매도 시 None
    pub holding_after: Option<Holding>,
    pub entry: HistoryEntry,
}

/// 장부 저장소 인터페이스
/// 확장성을 위해 트레이트로 정의하여 나중에 다른 DB로 전환 가능
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 사용자 생성. 이름이 이미 있으면 `StoreError::DuplicateUsername`
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        cash: Decimal,
    ) -> Result<User, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// 사용자의 전체 보유 종목 (심볼 순)
    async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, StoreError>;

    async fn holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>, StoreError>;

    /// 체결 내역 (최신순)
    async fn history(
        &self,
        user_id: UserId,
        limit: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    /// 현금/보유/내역을 하나의 트랜잭션으로 반영.
    /// 동시 갱신에 밀리면 아무것도 쓰지 않고 `StoreError::Conflict`
    async fn settle(&self, fill: &Fill) -> Result<Settlement, StoreError>;
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw)
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse {}: {} ({})", field, raw, e)))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse {}: {}", field, e)))?
        .with_timezone(&Utc))
}

/// SeaORM user::Model을 User로 변환
impl TryFrom<super::entities::user::Model> for User {
    type Error = StoreError;

    fn try_from(model: super::entities::user::Model) -> Result<Self, Self::Error> {
        Ok(User {
            cash: parse_decimal("cash", &model.cash)?,
            id: model.id,
            username: model.username,
            password_hash: model.hash,
        })
    }
}

/// SeaORM share::Model을 Holding으로 변환
impl TryFrom<super::entities::share::Model> for Holding {
    type Error = StoreError;

    fn try_from(model: super::entities::share::Model) -> Result<Self, Self::Error> {
        Ok(Holding {
            total_cost: parse_decimal("total_cost", &model.total_cost)?,
            created_at: parse_timestamp("created_at", &model.created_at)?,
            id: model.id,
            user_id: model.user_id,
            symbol: model.symbol,
            share_count: model.share_count,
        })
    }
}

/// SeaORM history::Model을 HistoryEntry로 변환
impl TryFrom<super::entities::history::Model> for HistoryEntry {
    type Error = StoreError;

    fn try_from(model: super::entities::history::Model) -> Result<Self, Self::Error> {
        Ok(HistoryEntry {
            price: parse_decimal("price", &model.price)?,
            status: TradeSide::from_str(&model.status).map_err(StoreError::Corrupt)?,
            timestamp: parse_timestamp("timestamp", &model.timestamp)?,
            id: model.id,
            user_id: model.user_id,
            symbol: model.symbol,
            share_count: model.share_count,
        })
    }
}

/// 저장소 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    #[error("Concurrent update conflict")]
    Conflict,

    #[error(transparent)]
    Rejected(#[from] LedgerError),

    #[error("Other error: {0}")]
    Other(String),
}
