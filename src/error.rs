use thiserror::Error;

/// Failure fetching one market's disclosure page from the upstream source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level trouble or a 5xx/429 response. Retried with backoff.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// A 4xx response or a response body that doesn't match the expected
    /// shape. Not retried; the market is marked failed immediately.
    #[error("permanent upstream failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Per-row failure while converting a raw disclosure row into a record.
/// The row is skipped and counted; the rest of the market batch continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("row has no company identifier")]
    MissingStockId,

    #[error("field {field} is not a usable number: {value:?}")]
    BadNumber { field: &'static str, value: String },
}

/// Terminal failures of a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid period {year}-{month:02}: year must be after 1911 and month in 1-12")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("all requested markets failed to fetch")]
    AllMarketsFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Transient("timeout".into()).is_transient());
        assert!(!FetchError::Permanent("404".into()).is_transient());
    }
}
