// Shared request plumbing for the hosting clients
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::retry::{with_retry_if, RetryConfig};

pub(crate) const USER_AGENT_VALUE: &str = concat!("gitwatch/", env!("CARGO_PKG_VERSION"));

/// Items requested per page when walking a paginated listing
pub const PAGE_SIZE: u32 = 100;

/// Hard stop for paginated listings so a huge org can't stall a cycle
pub const MAX_PAGES: u32 = 10;

/// How a provider expects its token to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthScheme {
    /// `Authorization: Bearer <token>` (GitHub, CNB)
    Bearer,
    /// `PRIVATE-TOKEN: <token>` (GitLab)
    PrivateToken,
}

/// Query parameter names a provider uses for pagination
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageParams {
    pub page: &'static str,
    pub size: &'static str,
}

pub(crate) fn build_client(accept: &'static str, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert(ACCEPT, HeaderValue::from_static(accept));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Client(e.to_string()))
}

/// A configured connection to one hosting API
pub(crate) struct Transport {
    pub client: reqwest::Client,
    pub token: Option<String>,
    pub auth: AuthScheme,
    pub retry_config: RetryConfig,
}

impl Transport {
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.token, self.auth) {
            (Some(token), AuthScheme::Bearer) => request.bearer_auth(token),
            (Some(token), AuthScheme::PrivateToken) => request.header("PRIVATE-TOKEN", token),
            (None, _) => request,
        }
    }

    /// GET a JSON document, retrying transient failures once
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> Result<T> {
        with_retry_if(
            &self.retry_config,
            || async {
                debug!("GET {} {:?}", url, query);

                let request = self.authorize(self.client.get(url).query(query));
                let response = request.send().await?;
                let status = response.status();

                if !status.is_success() {
                    let headers = response.headers().clone();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::from_status(status, &headers, body, resource));
                }

                let bytes = response.bytes().await?;
                let parsed: T = serde_json::from_slice(&bytes)?;
                Ok(parsed)
            },
            ApiError::is_retryable,
        )
        .await
    }

    /// Walk a paginated listing until a short page or the page cap
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        params: PageParams,
        resource: &str,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();

        for page in 1..=MAX_PAGES {
            let mut page_query = query.to_vec();
            page_query.push((params.page, page.to_string()));
            page_query.push((params.size, PAGE_SIZE.to_string()));

            let items: Vec<T> = self.get_json(url, &page_query, resource).await?;
            let count = items.len();
            all.extend(items);

            if count < PAGE_SIZE as usize {
                break;
            }

            if page == MAX_PAGES {
                debug!("Stopped listing {} at the {} page cap", resource, MAX_PAGES);
            }
        }

        Ok(all)
    }
}
