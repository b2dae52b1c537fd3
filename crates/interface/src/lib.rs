use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 시세 조회 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 정규화된 심볼 (대문자)
    pub symbol: String,
    /// 회사 이름
    pub name: String,
    /// 현재가 (USD)
    pub price: Decimal,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            price,
        }
    }
}

/// 사용자 입력 심볼 정규화 (공백 제거 + 대문자)
/// 빈 문자열이면 None
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim();
    if symbol.is_empty() {
        return None;
    }
    Some(symbol.to_ascii_uppercase())
}

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("other error: {0}")]
    Other(String),
}
