use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Index};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, RuntimeErr,
    Schema, Set, SqlErr, TransactionTrait,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::entities::{history, share, user};
use super::{Fill, HistoryEntry, Holding, LedgerStore, Settlement, StoreError, User, UserId};
use crate::ledger::{self, Position};

/// SQLite 기반 장부 저장소
#[derive(Clone)]
pub struct SqliteLedgerStore {
    db: DatabaseConnection,
    /// SQLite는 writer가 하나뿐이라 프로세스 안의 쓰기는 여기서 줄 세운다
    write_lock: Arc<Mutex<()>>,
}

/// SQLITE_BUSY / SQLITE_LOCKED (확장 코드 포함)
fn is_busy(e: &DbErr) -> bool {
    let runtime = match e {
        DbErr::Conn(err) | DbErr::Exec(err) | DbErr::Query(err) => err,
        _ => return false,
    };
    match runtime {
        RuntimeErr::SqlxError(err) => err
            .as_database_error()
            .and_then(|db| db.code())
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

/// 다른 연결/프로세스가 잠금을 쥐고 있으면 재시도 가능한 충돌로 본다
fn busy_as_conflict(e: StoreError) -> StoreError {
    match e {
        StoreError::Database(ref db) if is_busy(db) => {
            debug!("SQLite busy, reporting conflict: {}", db);
            StoreError::Conflict
        }
        other => other,
    }
}

impl SqliteLedgerStore {
    /// DB 파일을 열고 (없으면 생성) 스키마를 준비한다
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        // 디렉토리가 없으면 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Other(format!("Failed to create DB directory: {}", e))
                })?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::connect(&db_url, max_connections).await
    }

    /// 테스트용 메모리 DB (연결 1개 고정)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Connecting to SQLite database: {}", db_url);

        let mut options = ConnectOptions::new(db_url.to_string());
        options
            .max_connections(max_connections.max(1))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        let store = Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.create_schema().await?;

        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        // SeaORM SchemaBuilder를 사용하여 테이블 및 인덱스 생성
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        // FK 순서: users가 먼저
        let mut users_stmt = schema.create_table_from_entity(user::Entity);
        users_stmt.if_not_exists();
        self.db.execute(backend.build(&users_stmt)).await?;

        let mut shares_stmt = schema.create_table_from_entity(share::Entity);
        shares_stmt.if_not_exists();
        self.db.execute(backend.build(&shares_stmt)).await?;

        let mut history_stmt = schema.create_table_from_entity(history::Entity);
        history_stmt.if_not_exists();
        self.db.execute(backend.build(&history_stmt)).await?;

        // 사용자+심볼 당 보유 행은 하나
        let mut holding_idx = Index::create()
            .name("idx_shares_user_symbol")
            .table(share::Entity)
            .col(share::Column::UserId)
            .col(share::Column::Symbol)
            .unique()
            .to_owned();
        holding_idx.if_not_exists();
        self.db.execute(backend.build(&holding_idx)).await?;

        let mut history_idx = Index::create()
            .name("idx_history_user_timestamp")
            .table(history::Entity)
            .col(history::Column::UserId)
            .col(history::Column::Timestamp)
            .to_owned();
        history_idx.if_not_exists();
        if let Err(e) = self.db.execute(backend.build(&history_idx)).await {
            debug!("Index idx_history_user_timestamp creation skipped: {}", e);
        }

        info!("Ledger tables initialized");
        Ok(())
    }

    async fn find_holding_model(
        txn: &DatabaseTransaction,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Option<share::Model>, DbErr> {
        share::Entity::find()
            .filter(share::Column::UserId.eq(user_id))
            .filter(share::Column::Symbol.eq(symbol))
            .one(txn)
            .await
    }

    /// 읽은 값 그대로일 때만 현금 갱신 (compare-and-swap)
    async fn swap_cash(
        txn: &DatabaseTransaction,
        user: &user::Model,
        cash_after: Decimal,
    ) -> Result<(), StoreError> {
        let result = user::Entity::update_many()
            .col_expr(user::Column::Cash, Expr::value(cash_after.to_string()))
            .filter(user::Column::Id.eq(user.id))
            .filter(user::Column::Cash.eq(user.cash.clone()))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    /// 보유 행 생성/갱신/삭제. 기존 행은 수량이 읽은 값 그대로일 때만 바꾼다.
    async fn swap_holding(
        txn: &DatabaseTransaction,
        fill: &Fill,
        current: Option<share::Model>,
        after: Position,
    ) -> Result<Option<Holding>, StoreError> {
        match current {
            None => {
                let model = share::ActiveModel {
                    user_id: Set(fill.user_id),
                    symbol: Set(fill.symbol.clone()),
                    share_count: Set(after.share_count),
                    total_cost: Set(after.total_cost.to_string()),
                    created_at: Set(fill.executed_at.to_rfc3339()),
                    ..Default::default()
                };

                // 같은 종목 첫 매수가 동시에 들어오면 유니크 인덱스에서 걸린다
                let inserted = model.insert(txn).await.map_err(|e| match e.sql_err() {
                    Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Conflict,
                    _ => StoreError::Database(e),
                })?;
                Ok(Some(inserted.try_into()?))
            }
            Some(model) if after.is_empty() => {
                let result = share::Entity::delete_many()
                    .filter(share::Column::Id.eq(model.id))
                    .filter(share::Column::ShareCount.eq(model.share_count))
                    .exec(txn)
                    .await?;

                if result.rows_affected == 0 {
                    return Err(StoreError::Conflict);
                }
                Ok(None)
            }
            Some(model) => {
                let result = share::Entity::update_many()
                    .col_expr(share::Column::ShareCount, Expr::value(after.share_count))
                    .col_expr(
                        share::Column::TotalCost,
                        Expr::value(after.total_cost.to_string()),
                    )
                    .filter(share::Column::Id.eq(model.id))
                    .filter(share::Column::ShareCount.eq(model.share_count))
                    .filter(share::Column::TotalCost.eq(model.total_cost.clone()))
                    .exec(txn)
                    .await?;

                if result.rows_affected == 0 {
                    return Err(StoreError::Conflict);
                }

                let mut holding: Holding = model.try_into()?;
                holding.share_count = after.share_count;
                holding.total_cost = after.total_cost;
                Ok(Some(holding))
            }
        }
    }

    async fn settle_in(txn: &DatabaseTransaction, fill: &Fill) -> Result<Settlement, StoreError> {
        let user_model = user::Entity::find_by_id(fill.user_id)
            .one(txn)
            .await?
            .ok_or(StoreError::UserNotFound(fill.user_id))?;
        let holding_model = Self::find_holding_model(txn, fill.user_id, &fill.symbol).await?;

        let cash: Decimal = User::try_from(user_model.clone())?.cash;
        let position = match &holding_model {
            Some(model) => Holding::try_from(model.clone())?.position(),
            None => Position::EMPTY,
        };

        let posting = ledger::post(fill.side, cash, position, fill.shares, fill.price)?;

        Self::swap_cash(txn, &user_model, posting.cash_after).await?;
        let holding_after =
            Self::swap_holding(txn, fill, holding_model, posting.position_after).await?;

        let entry = history::ActiveModel {
            user_id: Set(fill.user_id),
            symbol: Set(fill.symbol.clone()),
            share_count: Set(fill.shares),
            price: Set(fill.price.to_string()),
            status: Set(fill.side.to_string()),
            timestamp: Set(fill.executed_at.to_rfc3339()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        Ok(Settlement {
            amount: posting.amount,
            cash_after: posting.cash_after,
            holding_after,
            entry: entry.try_into()?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        cash: Decimal,
    ) -> Result<User, StoreError> {
        let model = user::ActiveModel {
            username: Set(username.to_string()),
            hash: Set(password_hash.to_string()),
            cash: Set(cash.to_string()),
            ..Default::default()
        };

        let _guard = self.write_lock.lock().await;
        let inserted = model.insert(&self.db).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::DuplicateUsername(username.to_string())
            }
            _ => StoreError::Database(e),
        })?;

        inserted.try_into()
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let model = user::Entity::find_by_id(id).one(&self.db).await?;

        match model {
            Some(m) => Ok(Some(m.try_into()?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let model = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await?;

        match model {
            Some(m) => Ok(Some(m.try_into()?)),
            None => Ok(None),
        }
    }

    async fn holdings(&self, user_id: UserId) -> Result<Vec<Holding>, StoreError> {
        let models = share::Entity::find()
            .filter(share::Column::UserId.eq(user_id))
            .order_by_asc(share::Column::Symbol)
            .all(&self.db)
            .await?;

        models.into_iter().map(|m| m.try_into()).collect()
    }

    async fn holding(&self, user_id: UserId, symbol: &str) -> Result<Option<Holding>, StoreError> {
        let model = share::Entity::find()
            .filter(share::Column::UserId.eq(user_id))
            .filter(share::Column::Symbol.eq(symbol))
            .one(&self.db)
            .await?;

        match model {
            Some(m) => Ok(Some(m.try_into()?)),
            None => Ok(None),
        }
    }

    async fn history(
        &self,
        user_id: UserId,
        limit: Option<u64>,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut query = history::Entity::find()
            .filter(history::Column::UserId.eq(user_id))
            .order_by_desc(history::Column::Timestamp)
            .order_by_desc(history::Column::Id);

        if let Some(limit_val) = limit {
            query = query.limit(limit_val);
        }

        let models = query.all(&self.db).await?;

        models.into_iter().map(|m| m.try_into()).collect()
    }

    async fn settle(&self, fill: &Fill) -> Result<Settlement, StoreError> {
        let _guard = self.write_lock.lock().await;

        let settlement = async {
            let txn = self.db.begin().await?;

            // 실패 시 txn drop으로 롤백
            let settlement = Self::settle_in(&txn, fill).await?;
            txn.commit().await?;
            Ok::<_, StoreError>(settlement)
        }
        .await
        .map_err(busy_as_conflict)?;

        debug!(
            "Settled {} {} x{} @ {} for user {}",
            fill.side, fill.symbol, fill.shares, fill.price, fill.user_id
        );
        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerError, TradeSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn fill(user_id: UserId, side: TradeSide, symbol: &str, shares: i64, price: Decimal) -> Fill {
        Fill {
            user_id,
            side,
            symbol: symbol.to_string(),
            shares,
            price,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let user = store.create_user("alice", "hash", dec!(10000)).await.unwrap();

        let found = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.cash, dec!(10000));
        assert_eq!(found.password_hash, "hash");

        assert!(store.find_user(user.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        store.create_user("alice", "h1", dec!(1)).await.unwrap();

        let err = store.create_user("alice", "h2", dec!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(name) if name == "alice"));
    }

    #[tokio::test]
    async fn test_settle_buy_then_sell() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let user = store.create_user("alice", "h", dec!(10000)).await.unwrap();

        let bought = store
            .settle(&fill(user.id, TradeSide::Buy, "NFLX", 10, dec!(50)))
            .await
            .unwrap();
        assert_eq!(bought.cash_after, dec!(9500));
        assert_eq!(bought.holding_after.as_ref().unwrap().share_count, 10);

        let sold = store
            .settle(&fill(user.id, TradeSide::Sell, "NFLX", 4, dec!(60)))
            .await
            .unwrap();
        assert_eq!(sold.cash_after, dec!(9740));

        let holding = store.holding(user.id, "NFLX").await.unwrap().unwrap();
        assert_eq!(holding.share_count, 6);
        assert_eq!(holding.total_cost, dec!(300));

        let history = store.history(user.id, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, TradeSide::Sell);
        assert_eq!(history[1].status, TradeSide::Buy);
    }

    #[tokio::test]
    async fn test_selling_everything_removes_holding() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let user = store.create_user("alice", "h", dec!(1000)).await.unwrap();

        store
            .settle(&fill(user.id, TradeSide::Buy, "AAPL", 2, dec!(100)))
            .await
            .unwrap();
        let sold = store
            .settle(&fill(user.id, TradeSide::Sell, "AAPL", 2, dec!(100)))
            .await
            .unwrap();

        assert!(sold.holding_after.is_none());
        assert!(store.holdings(user.id).await.unwrap().is_empty());
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().cash, dec!(1000));
    }

    #[tokio::test]
    async fn test_rejected_settle_leaves_state_unchanged() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let user = store.create_user("alice", "h", dec!(100)).await.unwrap();

        let err = store
            .settle(&fill(user.id, TradeSide::Buy, "NFLX", 10, dec!(50)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Rejected(LedgerError::InsufficientFunds { .. })
        ));

        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().cash, dec!(100));
        assert!(store.holdings(user.id).await.unwrap().is_empty());
        assert!(store.history(user.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_for_unknown_user() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let err = store
            .settle(&fill(42, TradeSide::Buy, "NFLX", 1, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(42)));
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = SqliteLedgerStore::in_memory().await.unwrap();
        let user = store.create_user("alice", "h", dec!(1000)).await.unwrap();
        for _ in 0..3 {
            store
                .settle(&fill(user.id, TradeSide::Buy, "AAPL", 1, dec!(10)))
                .await
                .unwrap();
        }

        assert_eq!(store.history(user.id, Some(2)).await.unwrap().len(), 2);
    }

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("finance-test-{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_non_busy_errors_pass_through() {
        let err = busy_as_conflict(StoreError::Database(DbErr::Custom("boom".into())));
        assert!(matches!(err, StoreError::Database(_)));

        let err = busy_as_conflict(StoreError::Corrupt("bad".into()));
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settles_on_pooled_file_db() {
        let path = temp_db_path();
        let store = SqliteLedgerStore::open(&path, 4).await.unwrap();
        let user = store.create_user("alice", "h", dec!(100000)).await.unwrap();
        let user_id = user.id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .settle(&fill(user_id, TradeSide::Buy, "AAPL", 1, dec!(50)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let holding = store.holding(user.id, "AAPL").await.unwrap().unwrap();
        assert_eq!(holding.share_count, 16);
        assert_eq!(holding.total_cost, dec!(800));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().cash, dec!(99200));
        assert_eq!(store.history(user.id, None).await.unwrap().len(), 16);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_locked_by_other_connection_is_conflict() {
        let path = temp_db_path();
        let ours = SqliteLedgerStore::open(&path, 2).await.unwrap();
        let theirs = SqliteLedgerStore::open(&path, 2).await.unwrap();
        let user = ours.create_user("alice", "h", dec!(1000)).await.unwrap();

        // 다른 프로세스가 쓰기 잠금을 쥐고 있는 상황
        let txn = theirs.db.begin().await.unwrap();
        user::Entity::update_many()
            .col_expr(user::Column::Cash, Expr::value("1000"))
            .filter(user::Column::Id.eq(user.id))
            .exec(&txn)
            .await
            .unwrap();

        let err = ours
            .settle(&fill(user.id, TradeSide::Buy, "AAPL", 1, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        txn.rollback().await.unwrap();
        ours.settle(&fill(user.id, TradeSide::Buy, "AAPL", 1, dec!(10)))
            .await
            .unwrap();

        let _ = std::fs::remove_file(&path);
    }
}
