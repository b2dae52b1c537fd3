use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::store::{LedgerStore, UserId};

const PASSWORD_MIN_LEN: usize = 6;
const PASSWORD_MAX_LEN: usize = 20;
const PASSWORD_SYMBOLS: &str = "@$!%*#?&";
const MAX_TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 365;

/// 없는 사용자 로그인 시 검증 대상. `Argon2::default()`와 같은 파라미터여야 한다.
const DUMMY_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$rgiyu7g+rRcPsbnaRI2Fdg$t4FVYOPAjpC2RAn6hrsJMPiO5jCs2uOEsOxz1vedsuQ";

/// 6~20자, 허용 문자만, 소문자/대문자/숫자/기호 각 1개 이상
pub fn check_password_strength(password: &str) -> Result<(), Error> {
    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(Error::WeakPassword);
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c);
    if !password.chars().all(allowed) {
        return Err(Error::WeakPassword);
    }

    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| PASSWORD_SYMBOLS.contains(c));

    if has_lower && has_upper && has_digit && has_symbol {
        Ok(())
    } else {
        Err(Error::WeakPassword)
    }
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("failed to hash password: {}", e)))
}

/// Argon2 계산은 blocking 풀에서
async fn hash_password_blocking(password: &str) -> Result<String, Error> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| Error::Internal(format!("password hashing task failed: {}", e)))?
}

async fn verify_password_blocking(password: &str, hash: &str) -> Result<bool, Error> {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal(format!("password verification task failed: {}", e)))
}

/// 해시 문자열이 깨졌어도 false (자격 증명 실패로 취급)
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// 사용자 ID
    pub sub: UserId,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 세션 토큰 발급/검증
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::seconds(
                i64::try_from(ttl_secs)
                    .unwrap_or(MAX_TOKEN_TTL_SECS)
                    .min(MAX_TOKEN_TTL_SECS),
            ),
        }
    }

    /// 프로세스마다 임의 키 (재시작하면 기존 토큰은 무효)
    pub fn ephemeral(ttl_secs: u64) -> Self {
        let secret = format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        Self::new(secret.as_bytes(), ttl_secs)
    }

    pub fn issue(&self, user_id: UserId, username: &str) -> Result<String, Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("failed to issue token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| Error::Unauthorized)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
}

/// 회원가입/로그인
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn LedgerStore>,
    tokens: TokenIssuer,
    starting_cash: Decimal,
}

impl AuthService {
    pub fn new(store: Arc<dyn LedgerStore>, tokens: TokenIssuer, starting_cash: Decimal) -> Self {
        Self {
            store,
            tokens,
            starting_cash,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<UserId, Error> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("must provide username".to_string()));
        }

        if self.store.find_user_by_username(username).await?.is_some() {
            return Err(Error::UsernameTaken);
        }

        if password.is_empty() || confirmation.is_empty() {
            return Err(Error::InvalidInput("must provide password".to_string()));
        }
        if password != confirmation {
            return Err(Error::PasswordMismatch);
        }
        check_password_strength(password)?;

        let hash = hash_password_blocking(password).await?;
        // 동시 가입은 유니크 인덱스가 UsernameTaken으로 막는다
        let user = self
            .store
            .create_user(username, &hash, self.starting_cash)
            .await?;

        info!("Registered user {} (id={})", user.username, user.id);
        Ok(user.id)
    }

    /// 없는 사용자와 틀린 비밀번호는 구분하지 않는다
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, Error> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::InvalidInput("must provide username".to_string()));
        }
        if password.is_empty() {
            return Err(Error::InvalidInput("must provide password".to_string()));
        }

        // 없는 사용자도 같은 비용으로 검증해 응답 시간 차이를 없앤다
        let user = self.store.find_user_by_username(username).await?;
        let hash = user
            .as_ref()
            .map_or(DUMMY_PASSWORD_HASH, |u| u.password_hash.as_str());
        let verified = verify_password_blocking(password, hash).await?;

        let user = match user {
            Some(user) if verified => user,
            _ => return Err(Error::InvalidCredentials),
        };

        let token = self.tokens.issue(user.id, &user.username)?;
        info!("User {} logged in", user.username);

        Ok(Session {
            token,
            user_id: user.id,
            username: user.username,
        })
    }

    pub fn authenticate(&self, token: &str) -> Result<Claims, Error> {
        self.tokens.verify(token)
    }
}
