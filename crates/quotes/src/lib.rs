use async_trait::async_trait;

use interface::{Quote, QuoteError};

pub mod fixed;
pub mod iex;

/// 시세 제공자 공통 인터페이스.
///
/// `Ok(None)`은 "존재하지 않는 심볼", `Err`는 제공자 장애를 의미한다.
/// 심볼은 호출자가 정규화(대문자)해서 넘긴다.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, QuoteError>;
}

// Convenience re-exports
pub use fixed::FixedQuoteProvider;
pub use iex::{IexQuoteProvider, DEFAULT_BASE_URL};
