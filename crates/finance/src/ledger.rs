//! 매수/매도 장부 계산.
//!
//! DB와 무관한 순수 산술만 담당한다. 저장소는 트랜잭션 안에서 읽은 값으로
//! 여기 함수를 호출하고, 결과를 그대로 기록한다.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// 원가 계산 시 보존할 소수 자릿수
pub const COST_SCALE: u32 = 4;

/// 거래 방향 (매수/매도)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            _ => Err(format!("Invalid TradeSide: {}", s)),
        }
    }
}

/// 한 종목의 보유 상태. 보유가 없으면 `Position::EMPTY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub share_count: i64,
    pub total_cost: Decimal,
}

impl Position {
    pub const EMPTY: Position = Position {
        share_count: 0,
        total_cost: Decimal::ZERO,
    };

    pub fn is_empty(&self) -> bool {
        self.share_count == 0
    }
}

/// 장부 반영 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// 체결 금액 (price * shares)
    pub amount: Decimal,
    pub cash_after: Decimal,
    pub position_after: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("quantity must be a positive integer, got {0}")]
    InvalidQuantity(i64),

    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("can't afford: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("too many shares: requested {requested}, held {held}")]
    InsufficientShares { requested: i64, held: i64 },

    #[error("amount out of range")]
    Overflow,
}

fn trade_amount(shares: i64, price: Decimal) -> Result<Decimal, LedgerError> {
    if shares <= 0 {
        return Err(LedgerError::InvalidQuantity(shares));
    }
    if price <= Decimal::ZERO {
        return Err(LedgerError::InvalidPrice(price));
    }
    price
        .checked_mul(Decimal::from(shares))
        .ok_or(LedgerError::Overflow)
}

/// 매수: 현금 차감, 수량/원가 증가
pub fn post_buy(
    cash: Decimal,
    position: Position,
    shares: i64,
    price: Decimal,
) -> Result<Posting, LedgerError> {
    let amount = trade_amount(shares, price)?;

    if amount > cash {
        return Err(LedgerError::InsufficientFunds {
            required: amount,
            available: cash,
        });
    }

    let share_count = position
        .share_count
        .checked_add(shares)
        .ok_or(LedgerError::Overflow)?;
    let total_cost = position
        .total_cost
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)?;

    Ok(Posting {
        amount,
        cash_after: cash - amount,
        position_after: Position {
            share_count,
            total_cost,
        },
    })
}

/// 매도: 수량 차감, 평균 원가 기준으로 원가 비례 감소, 현금 증가
pub fn post_sell(
    cash: Decimal,
    position: Position,
    shares: i64,
    price: Decimal,
) -> Result<Posting, LedgerError> {
    let amount = trade_amount(shares, price)?;

    if shares > position.share_count {
        return Err(LedgerError::InsufficientShares {
            requested: shares,
            held: position.share_count,
        });
    }

    let share_count = position.share_count - shares;
    let total_cost = if share_count == 0 {
        Decimal::ZERO
    } else {
        let released = position
            .total_cost
            .checked_mul(Decimal::from(shares))
            .ok_or(LedgerError::Overflow)?
            / Decimal::from(position.share_count);
        position.total_cost
            - released.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
    };

    let cash_after = cash.checked_add(amount).ok_or(LedgerError::Overflow)?;

    Ok(Posting {
        amount,
        cash_after,
        position_after: Position {
            share_count,
            total_cost,
        },
    })
}

pub fn post(
    side: TradeSide,
    cash: Decimal,
    position: Position,
    shares: i64,
    price: Decimal,
) -> Result<Posting, LedgerError> {
    match side {
        TradeSide::Buy => post_buy(cash, position, shares, price),
        TradeSide::Sell => post_sell(cash, position, shares, price),
    }
}
