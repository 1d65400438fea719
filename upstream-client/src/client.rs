use std::{sync::Arc, time::Duration};

use common::error::AppError;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    accounts::{self, AccountListing},
    assets::{self, AssetQuery},
    auth::{self, Credentials, TokenState},
    upload::{self, ImportStatus, PresignedUpload, UploadMode},
};

/// One preconfigured `reqwest::Client` per timeout class, since auth,
/// account listing, asset paging, upload, and status polling have
/// materially different latency budgets.
#[derive(Clone)]
struct Clients {
    auth: reqwest::Client,
    accounts: reqwest::Client,
    assets: reqwest::Client,
    upload: reqwest::Client,
    status: reqwest::Client,
}

impl Clients {
    fn build() -> Result<Self, AppError> {
        Ok(Clients {
            auth: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            accounts: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            assets: reqwest::Client::builder()
                .timeout(Duration::from_secs(600))
                .build()?,
            upload: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()?,
            status: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
        })
    }
}

pub struct UmbrellaClient {
    clients: Clients,
    base_url: String,
    broker_url: String,
    credentials: Credentials,
    token: Mutex<TokenState>,
}

impl UmbrellaClient {
    pub fn new(base_url: String, broker_url: String, credentials: Credentials) -> Result<Arc<Self>, AppError> {
        Ok(Arc::new(UmbrellaClient {
            clients: Clients::build()?,
            base_url,
            broker_url,
            credentials,
            token: Mutex::new(TokenState::default()),
        }))
    }

    async fn ensure_authenticated(&self) -> Result<TokenState, AppError> {
        {
            let token = self.token.lock().await;
            if token.is_valid() {
                return Ok(token.clone());
            }
        }
        let fresh = auth::authenticate(
            &self.clients.auth,
            &self.base_url,
            &self.broker_url,
            &self.credentials,
        )
        .await?;
        *self.token.lock().await = fresh.clone();
        Ok(fresh)
    }

    async fn force_reauthenticate(&self) -> Result<TokenState, AppError> {
        *self.token.lock().await = TokenState::default();
        self.ensure_authenticated().await
    }

    fn headers_from_token(token: &TokenState, account_key: Option<&str>) -> Result<HeaderMap, AppError> {
        let jwt = token
            .jwt
            .as_deref()
            .ok_or_else(|| AppError::Credential("no token available".into()))?;
        let user_key = token
            .user_key
            .as_deref()
            .ok_or_else(|| AppError::Credential("no user key available".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(jwt).map_err(|e| AppError::Credential(e.to_string()))?,
        );
        headers.insert(
            "apikey",
            HeaderValue::from_str(&auth::apikey_header(user_key, account_key))
                .map_err(|e| AppError::Credential(e.to_string()))?,
        );
        Ok(headers)
    }

    async fn authenticated_headers(&self, account_key: Option<&str>) -> Result<HeaderMap, AppError> {
        let token = self.ensure_authenticated().await?;
        Self::headers_from_token(&token, account_key)
    }

    pub async fn list_accounts(&self) -> Result<AccountListing, AppError> {
        let headers = self.authenticated_headers(None).await?;
        match accounts::list_accounts(&self.clients.accounts, &self.base_url, headers).await {
            Ok(listing) => Ok(listing),
            Err(_) => {
                let headers = {
                    let token = self.force_reauthenticate().await?;
                    Self::headers_from_token(&token, None)?
                };
                accounts::list_accounts(&self.clients.accounts, &self.base_url, headers).await
            }
        }
    }

    /// Streams asset pages for one account, re-authenticating once on a 401
    /// encountered mid-stream.
    pub fn fetch_assets_stream<'a>(
        &'a self,
        account_key: &'a str,
        query: AssetQuery,
        batch_size: usize,
    ) -> impl Stream<Item = Result<Vec<Value>, AppError>> + 'a {
        async_stream::try_stream! {
            let headers = self.authenticated_headers(Some(account_key)).await?;
            let refresh = || async move {
                let token = self.force_reauthenticate().await?;
                Self::headers_from_token(&token, Some(account_key))
            };
            let stream = assets::fetch_assets_stream(
                &self.clients.assets,
                &self.base_url,
                headers,
                query,
                batch_size,
                refresh,
            );
            futures::pin_mut!(stream);
            while let Some(batch) = futures::StreamExt::next(&mut stream).await {
                yield batch?;
            }
        }
    }

    pub async fn upload_virtual_tags(
        &self,
        account_key: &str,
        mode: UploadMode,
        compressed: bool,
        body: Vec<u8>,
    ) -> Result<PresignedUpload, AppError> {
        let headers = self.authenticated_headers(Some(account_key)).await?;
        upload::upload_virtual_tags(
            &self.clients.upload,
            &self.base_url,
            headers,
            mode,
            compressed,
            body,
        )
        .await
    }

    pub async fn poll_import_status(&self, upload_id: &str) -> Result<ImportStatus, AppError> {
        let headers = self.authenticated_headers(None).await?;
        upload::poll_import_status(&self.clients.status, &self.base_url, headers, upload_id).await
    }
}
