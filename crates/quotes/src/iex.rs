use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use interface::{Quote, QuoteError};

use crate::QuoteProvider;

pub const DEFAULT_BASE_URL: &str = "https://cloud.iexapis.com/stable";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IexQuoteResponse {
    symbol: String,
    company_name: Option<String>,
    latest_price: Option<Decimal>,
}

/// IEX Cloud `/stock/{symbol}/quote` 기반 시세 제공자
pub struct IexQuoteProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IexQuoteProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn quote_url(&self, symbol: &str) -> Result<Url, QuoteError> {
        let mut url = Url::parse(self.base_url.trim_end_matches('/'))
            .map_err(|e| QuoteError::Other(format!("Invalid quote base url: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| QuoteError::Other("Quote base url cannot be a base".to_string()))?
            .push("stock")
            .push(symbol)
            .push("quote");
        url.query_pairs_mut().append_pair("token", &self.api_key);

        Ok(url)
    }
}

#[async_trait]
impl QuoteProvider for IexQuoteProvider {
    fn name(&self) -> &'static str {
        "iex"
    }

    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, QuoteError> {
        let url = self.quote_url(symbol)?;

        let response = self.http.get(url).send().await?;

        let status = response.status();
        let response_text = response.text().await?;

        // 알 수 없는 심볼은 404 + "Unknown symbol"
        if status == StatusCode::NOT_FOUND {
            debug!("IEX: unknown symbol {}", symbol);
            return Ok(None);
        }

        if !status.is_success() {
            return Err(QuoteError::Other(format!(
                "IEX API HTTP error: status {}, response: {}",
                status,
                response_text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: IexQuoteResponse = serde_json::from_str(&response_text).map_err(|e| {
            QuoteError::Other(format!(
                "Failed to parse IEX response: {}, response: {}",
                e,
                response_text.chars().take(200).collect::<String>()
            ))
        })?;

        let Some(price) = parsed.latest_price else {
            warn!("IEX: {} has no latest price", symbol);
            return Ok(None);
        };

        Ok(Some(Quote {
            name: parsed.company_name.unwrap_or_else(|| parsed.symbol.clone()),
            symbol: parsed.symbol.to_ascii_uppercase(),
            price,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_url_escapes_symbol_and_appends_token() {
        let provider = IexQuoteProvider::new("https://example.test/stable/", "pk_test").unwrap();
        let url = provider.quote_url("BRK/B").unwrap();

        assert_eq!(
            url.as_str(),
            "https://example.test/stable/stock/BRK%2FB/quote?token=pk_test"
        );
    }

    #[test]
    fn test_parse_iex_response() {
        let body = r#"{"symbol":"NFLX","companyName":"Netflix Inc.","latestPrice":412.5,"volume":1}"#;
        let parsed: IexQuoteResponse = serde_json::from_str(body).unwrap();

        assert_eq!(parsed.symbol, "NFLX");
        assert_eq!(parsed.company_name.as_deref(), Some("Netflix Inc."));
        assert_eq!(parsed.latest_price, Some(dec!(412.5)));
    }

    #[test]
    fn test_parse_iex_response_without_price() {
        let body = r#"{"symbol":"XYZ","companyName":null,"latestPrice":null}"#;
        let parsed: IexQuoteResponse = serde_json::from_str(body).unwrap();

        assert!(parsed.latest_price.is_none());
        assert!(parsed.company_name.is_none());
    }
}
