use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use interface::{Quote, normalize_symbol};
use quotes::QuoteProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::ledger::TradeSide;
use crate::store::{Fill, HistoryEntry, LedgerStore, StoreError, UserId};

/// 동시 갱신 충돌 시 재시도 횟수 (첫 시도 포함)
pub const MAX_SETTLE_ATTEMPTS: usize = 3;

/// 체결 영수증
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub side: TradeSide,
    pub symbol: String,
    pub shares: i64,
    pub price: Decimal,
    /// price * shares
    pub total: Decimal,
    pub cash_after: Decimal,
    /// 체결 후 보유 수량
    pub shares_held: i64,
    /// 기록된 history 행
    pub history_id: i64,
    pub executed_at: DateTime<Utc>,
}

/// 포트폴리오 한 줄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingView {
    pub symbol: String,
    pub name: Option<String>,
    pub share_count: i64,
    pub total_cost: Decimal,
    /// 시세 조회 실패 시 None
    pub price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_gain: Option<Decimal>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioView {
    pub user_id: UserId,
    pub cash: Decimal,
    pub holdings: Vec<HoldingView>,
    /// 시세가 있는 종목의 평가액 합
    pub holdings_value: Decimal,
    /// cash + holdings_value
    pub total: Decimal,
}

/// 매수/매도/평가. 상태는 저장소에만 있고 엔진은 요청마다 읽고 쓴다.
#[derive(Clone)]
pub struct TradingEngine {
    store: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteProvider>,
}

impl TradingEngine {
    pub fn new(store: Arc<dyn LedgerStore>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { store, quotes }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// 심볼 시세 조회
    pub async fn quote(&self, symbol: &str) -> Result<Quote, Error> {
        let symbol = normalize_symbol(symbol)
            .ok_or_else(|| Error::InvalidInput("must provide symbol".to_string()))?;

        self.quotes
            .lookup(&symbol)
            .await?
            .ok_or(Error::UnknownSymbol(symbol))
    }

    pub async fn buy(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: i64,
    ) -> Result<TradeReceipt, Error> {
        self.trade(user_id, TradeSide::Buy, symbol, shares).await
    }

    pub async fn sell(
        &self,
        user_id: UserId,
        symbol: &str,
        shares: i64,
    ) -> Result<TradeReceipt, Error> {
        self.trade(user_id, TradeSide::Sell, symbol, shares).await
    }

    async fn trade(
        &self,
        user_id: UserId,
        side: TradeSide,
        symbol: &str,
        shares: i64,
    ) -> Result<TradeReceipt, Error> {
        let symbol = normalize_symbol(symbol)
            .ok_or_else(|| Error::InvalidInput("must provide symbol".to_string()))?;
        if shares <= 0 {
            return Err(Error::InvalidInput(
                "shares must be a positive integer".to_string(),
            ));
        }

        // 매도는 가격 조회 전에 보유 수량부터 확인 (최종 판단은 트랜잭션 안에서)
        if side == TradeSide::Sell {
            let held = self
                .store
                .holding(user_id, &symbol)
                .await?
                .map(|h| h.share_count)
                .unwrap_or(0);
            if shares > held {
                warn!(
                    "Rejected SELL {} x{} for user {}: holds {}",
                    symbol, shares, user_id, held
                );
                return Err(Error::InsufficientShares);
            }
        }

        let quote = self.quote(&symbol).await?;

        let fill = Fill {
            user_id,
            side,
            symbol,
            shares,
            price: quote.price,
            executed_at: Utc::now(),
        };

        let mut attempt = 1;
        let settlement = loop {
            match self.store.settle(&fill).await {
                Err(StoreError::Conflict) if attempt < MAX_SETTLE_ATTEMPTS => {
                    warn!(
                        "Settle conflict for user {} on {} (attempt {}), retrying",
                        user_id, fill.symbol, attempt
                    );
                    tokio::time::sleep(Duration::from_millis(20 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(StoreError::Rejected(rejection)) => {
                    warn!(
                        "Rejected {} {} x{} for user {}: {}",
                        side, fill.symbol, shares, user_id, rejection
                    );
                    return Err(rejection.into());
                }
                other => break other?,
            }
        };

        info!(
            "{} {} x{} @ {} for user {} (cash now {})",
            side, fill.symbol, shares, fill.price, user_id, settlement.cash_after
        );

        Ok(TradeReceipt {
            side,
            symbol: fill.symbol,
            shares,
            price: fill.price,
            total: settlement.amount,
            cash_after: settlement.cash_after,
            shares_held: settlement
                .holding_after
                .map(|h| h.share_count)
                .unwrap_or(0),
            history_id: settlement.entry.id,
            executed_at: settlement.entry.timestamp,
        })
    }

    /// 포트폴리오 평가. 시세 조회가 실패한 종목은 stale로 표시하고 합계에서 뺀다.
    pub async fn valuate(&self, user_id: UserId) -> Result<PortfolioView, Error> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(Error::Unauthorized)?;
        let holdings = self.store.holdings(user_id).await?;

        let mut views = Vec::with_capacity(holdings.len());
        let mut holdings_value = Decimal::ZERO;

        for holding in holdings {
            let quote = match self.quotes.lookup(&holding.symbol).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("Quote lookup failed for {}: {}", holding.symbol, e);
                    None
                }
            };

            let priced = quote.and_then(|quote| {
                quote
                    .price
                    .checked_mul(Decimal::from(holding.share_count))
                    .map(|market_value| (quote, market_value))
            });

            let view = match priced {
                Some((quote, market_value)) => {
                    holdings_value = holdings_value
                        .checked_add(market_value)
                        .ok_or_else(|| Error::Internal("portfolio value overflow".to_string()))?;
                    HoldingView {
                        symbol: holding.symbol,
                        name: Some(quote.name),
                        share_count: holding.share_count,
                        total_cost: holding.total_cost,
                        price: Some(quote.price),
                        market_value: Some(market_value),
                        unrealized_gain: Some(market_value - holding.total_cost),
                        stale: false,
                    }
                }
                None => HoldingView {
                    symbol: holding.symbol,
                    name: None,
                    share_count: holding.share_count,
                    total_cost: holding.total_cost,
                    price: None,
                    market_value: None,
                    unrealized_gain: None,
                    stale: true,
                },
            };
            views.push(view);
        }

        let total = user
            .cash
            .checked_add(holdings_value)
            .ok_or_else(|| Error::Internal("portfolio value overflow".to_string()))?;

        Ok(PortfolioView {
            user_id,
            cash: user.cash,
            holdings: views,
            holdings_value,
            total,
        })
    }

    /// 체결 내역 (최신순)
    pub async fn history(&self, user_id: UserId) -> Result<Vec<HistoryEntry>, Error> {
        Ok(self.store.history(user_id, None).await?)
    }
}
