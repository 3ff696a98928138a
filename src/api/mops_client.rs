use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ApiRateLimiter, RevenueSource};
use crate::error::FetchError;
use crate::models::{roc_year, Config, Market, RawRow};

const REVENUE_ENDPOINT: &str = "/mops/api/t21sc04_ifrs";

/// Response envelope the MOPS JSON endpoint wraps its rows in.
#[derive(Debug, Deserialize)]
struct MopsEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<MopsResult>,
}

#[derive(Debug, Default, Deserialize)]
struct MopsResult {
    #[serde(default)]
    data: Vec<RawRow>,
}

/// Client for the MOPS monthly revenue endpoint.
pub struct MopsClient {
    client: Client,
    base_url: String,
    rate_limiter: ApiRateLimiter,
    retry_attempts: u32,
}

impl MopsClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("mops-revenue/0.1")
            .build()?;

        Ok(Self {
            client,
            base_url: config.mops_base_url.trim_end_matches('/').to_string(),
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
            retry_attempts: config.fetch_retry_attempts.max(1),
        })
    }

    /// One request, no retry. The upstream speaks ROC years and zero-padded
    /// months, so the Gregorian period is converted here.
    async fn fetch_once(
        &self,
        market: Market,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawRow>, FetchError> {
        self.rate_limiter.wait().await;

        let url = format!("{}{}", self.base_url, REVENUE_ENDPOINT);
        let body = json!({
            "year": roc_year(year).to_string(),
            "month": format!("{month:02}"),
            "TYPEK": market.as_str(),
        });

        debug!("POST {} {}", url, body);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!(
                "upstream returned {status} for {market}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!(
                "upstream returned {status} for {market}"
            )));
        }

        let envelope: MopsEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("malformed response body: {e}")))?;

        if envelope.code != 200 {
            return Err(FetchError::Permanent(format!(
                "upstream rejected the query (code {}): {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }

        // code 200 with no data is a legitimate empty period, not a failure
        Ok(envelope.result.unwrap_or_default().data)
    }
}

/// Errors from `send()` are network-level (timeout, connect failure, reset)
/// and worth retrying.
fn classify_request_error(err: reqwest::Error) -> FetchError {
    FetchError::Transient(err.to_string())
}

#[async_trait::async_trait]
impl RevenueSource for MopsClient {
    async fn fetch_monthly_revenue(
        &self,
        market: Market,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawRow>, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.fetch_once(market, year, month).await {
                Ok(rows) => {
                    debug!("Fetched {} raw rows for {} {}-{:02}", rows.len(), market, year, month);
                    return Ok(rows);
                }
                Err(err @ FetchError::Permanent(_)) => return Err(err),
                Err(FetchError::Transient(reason)) => {
                    if attempt >= self.retry_attempts {
                        return Err(FetchError::Transient(reason));
                    }
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {:?}...",
                        attempt, self.retry_attempts, market, reason, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
