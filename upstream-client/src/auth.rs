use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use common::error::AppError;
use serde::Deserialize;
use tracing::{info, warn};

const TOKEN_LIFETIME_SECS: i64 = 60 * 60;
const RENEWAL_BUFFER_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct TokenState {
    pub jwt: Option<String>,
    pub user_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// True once a token has been obtained and the 5-minute renewal buffer
    /// before its assumed 1-hour lifetime has not yet been crossed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let (Some(_), Some(expiry)) = (&self.jwt, self.expires_at) else {
            return false;
        };
        Utc::now() + Duration::seconds(RENEWAL_BUFFER_SECS) < expiry
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "Authorization")]
    authorization: Option<String>,
    apikey: Option<String>,
}

/// Authenticates via the token-broker endpoint first, falling back to the
/// Basic-auth token-exchange endpoint on any non-success response from the
/// broker — the dual mechanism the spec treats as canonical.
pub async fn authenticate(
    client: &reqwest::Client,
    base_url: &str,
    broker_url: &str,
    credentials: &Credentials,
) -> Result<TokenState, AppError> {
    match authenticate_via_broker(client, broker_url, credentials).await {
        Ok(state) => return Ok(state),
        Err(err) => {
            warn!(error = %err, "token broker authentication failed, falling back to basic-auth exchange");
        }
    }
    authenticate_via_basic(client, base_url, credentials).await
}

async fn authenticate_via_broker(
    client: &reqwest::Client,
    broker_url: &str,
    credentials: &Credentials,
) -> Result<TokenState, AppError> {
    let response = client
        .post(broker_url)
        .json(&serde_json::json!({
            "username": credentials.username,
            "password": credentials.password,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::Credential(format!(
            "token broker returned status {}",
            response.status()
        )));
    }

    parse_auth_response(response).await
}

async fn authenticate_via_basic(
    client: &reqwest::Client,
    base_url: &str,
    credentials: &Credentials,
) -> Result<TokenState, AppError> {
    let basic = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    let response = client
        .post(format!("{base_url}/v1/authentication/token/generate"))
        .header("Authorization", format!("Basic {basic}"))
        .json(&serde_json::json!({
            "username": credentials.username,
            "password": credentials.password,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::Credential(format!(
            "basic-auth token exchange returned status {}",
            response.status()
        )));
    }

    parse_auth_response(response).await
}

async fn parse_auth_response(response: reqwest::Response) -> Result<TokenState, AppError> {
    let parsed: AuthResponse = response.json().await.map_err(|e| {
        AppError::Credential(format!("malformed authentication response: {e}"))
    })?;

    let jwt = parsed
        .authorization
        .ok_or_else(|| AppError::Credential("authentication response missing Authorization".into()))?;
    let apikey = parsed
        .apikey
        .ok_or_else(|| AppError::Credential("authentication response missing apikey".into()))?;
    let user_key = apikey
        .split(':')
        .next()
        .ok_or_else(|| AppError::Credential("malformed apikey".into()))?
        .to_string();

    info!("authenticated against upstream API");

    Ok(TokenState {
        jwt: Some(jwt),
        user_key: Some(user_key),
        expires_at: Some(Utc::now() + Duration::seconds(TOKEN_LIFETIME_SECS)),
    })
}

/// Builds the `apikey` header value: `"<user_key>:<account_key>:0"`, or
/// `"<user_key>:-1:-1"` for account-listing calls without a scoped account.
#[must_use]
pub fn apikey_header(user_key: &str, account_key: Option<&str>) -> String {
    match account_key {
        Some(key) => format!("{user_key}:{key}:0"),
        None => format!("{user_key}:-1:-1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apikey_header_scoped_to_account() {
        assert_eq!(apikey_header("u1", Some("acct-1")), "u1:acct-1:0");
    }

    #[test]
    fn apikey_header_unscoped() {
        assert_eq!(apikey_header("u1", None), "u1:-1:-1");
    }

    #[test]
    fn token_state_invalid_before_renewal_buffer() {
        let state = TokenState {
            jwt: Some("x".to_string()),
            user_key: Some("u".to_string()),
            expires_at: Some(Utc::now() + Duration::minutes(3)),
        };
        assert!(!state.is_valid());
    }

    #[test]
    fn token_state_valid_well_before_expiry() {
        let state = TokenState {
            jwt: Some("x".to_string()),
            user_key: Some("u".to_string()),
            expires_at: Some(Utc::now() + Duration::minutes(50)),
        };
        assert!(state.is_valid());
    }
}
