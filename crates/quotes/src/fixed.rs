use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use interface::{Quote, QuoteError};

use crate::QuoteProvider;

/// 메모리에 고정된 시세를 돌려주는 제공자.
/// 오프라인 실행과 테스트에서 사용한다.
#[derive(Default)]
pub struct FixedQuoteProvider {
    quotes: RwLock<HashMap<String, Quote>>,
    failing: RwLock<HashSet<String>>,
}

impl FixedQuoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, name: &str, price: Decimal) -> Self {
        self.set_price(symbol, name, price);
        self
    }

    /// 시세 등록/갱신
    pub fn set_price(&self, symbol: &str, name: &str, price: Decimal) {
        let symbol = symbol.to_ascii_uppercase();
        let mut quotes = self.quotes.write().unwrap();
        quotes.insert(symbol.clone(), Quote::new(symbol, name, price));
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes
            .write()
            .unwrap()
            .remove(&symbol.to_ascii_uppercase());
    }

    /// 해당 심볼 조회 시 제공자 장애를 흉내낸다
    pub fn fail(&self, symbol: &str) {
        self.failing
            .write()
            .unwrap()
            .insert(symbol.to_ascii_uppercase());
    }

    pub fn recover(&self, symbol: &str) {
        self.failing
            .write()
            .unwrap()
            .remove(&symbol.to_ascii_uppercase());
    }
}

#[async_trait]
impl QuoteProvider for FixedQuoteProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, QuoteError> {
        if self.failing.read().unwrap().contains(symbol) {
            return Err(QuoteError::Other(format!(
                "quote provider unavailable for {}",
                symbol
            )));
        }
        Ok(self.quotes.read().unwrap().get(symbol).cloned())
    }
}
