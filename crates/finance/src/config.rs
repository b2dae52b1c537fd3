use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 12091;
pub const DEFAULT_STARTING_CASH: Decimal = Decimal::from_parts(10000, 0, 0, false, 0);
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60 * 60 * 24;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// 프로세스 설정. `.env`는 lib 로드 시점에 이미 반영되어 있다.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub quote_base_url: String,
    pub db_path: PathBuf,
    pub db_max_connections: u32,
    pub port: u16,
    /// None이면 프로세스마다 임의 생성
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub starting_cash: Decimal,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 변수 조회 함수를 받아 설정을 구성한다 (테스트에서 env 없이 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;

        let starting_cash: Decimal =
            parse_or("STARTING_CASH", get("STARTING_CASH"), DEFAULT_STARTING_CASH)?;
        // 현금은 음수가 될 수 없다
        if starting_cash.is_sign_negative() && !starting_cash.is_zero() {
            return Err(ConfigError::Invalid {
                key: "STARTING_CASH",
                value: starting_cash.to_string(),
            });
        }

        Ok(Self {
            api_key,
            quote_base_url: get("QUOTE_BASE_URL")
                .unwrap_or_else(|| quotes::DEFAULT_BASE_URL.to_string()),
            db_path: PathBuf::from(get("DB_PATH").unwrap_or_else(|| "finance.db".to_string())),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", get("DB_MAX_CONNECTIONS"), 1)?,
            port: parse_or("FINANCE_API_PORT", get("FINANCE_API_PORT"), DEFAULT_PORT)?,
            jwt_secret: get("JWT_SECRET"),
            token_ttl_secs: parse_or(
                "TOKEN_TTL_SECS",
                get("TOKEN_TTL_SECS"),
                DEFAULT_TOKEN_TTL_SECS,
            )?,
            starting_cash,
            log_dir: PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "logs".to_string())),
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
