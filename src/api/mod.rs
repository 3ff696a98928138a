use std::time::Duration;

use crate::error::FetchError;
use crate::models::{Market, RawRow};

pub mod mops_client;
pub use mops_client::MopsClient;

/// Simple rate limiter spacing out upstream requests.
pub struct ApiRateLimiter {
    delay_ms: u64,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            60_000 / requests_per_minute as u64
        } else {
            1000 // Default 1 second delay
        };

        Self { delay_ms }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
    }
}

/// Source of raw monthly disclosure rows, one bulk page per (market, period).
///
/// An upstream that legitimately has no rows for the period returns an empty
/// Vec; `Err` always means the fetch itself failed.
#[async_trait::async_trait]
pub trait RevenueSource: Send + Sync {
    async fn fetch_monthly_revenue(
        &self,
        market: Market,
        year: i32,
        month: u32,
    ) -> Result<Vec<RawRow>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = ApiRateLimiter::new(600); // one request per 100ms

        let start = std::time::Instant::now();
        limiter.wait().await;
        limiter.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
