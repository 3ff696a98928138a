use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One raw disclosure row exactly as the upstream returned it. Untyped data
/// stops at the normalization boundary; nothing past `normalize` consumes it.
pub type RawRow = serde_json::Map<String, Value>;

/// Listing venue a company discloses under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Listed companies (上市)
    Sii,
    /// Over-the-counter companies (上櫃)
    Otc,
    /// Emerging/registered companies (興櫃)
    Rotc,
}

impl Market {
    pub fn all() -> [Market; 3] {
        [Market::Sii, Market::Otc, Market::Rotc]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Sii => "sii",
            Market::Otc => "otc",
            Market::Rotc => "rotc",
        }
    }

    /// Operator-facing Chinese label used in CLI output and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Market::Sii => "上市",
            Market::Otc => "上櫃",
            Market::Rotc => "興櫃",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sii" => Ok(Market::Sii),
            "otc" => Ok(Market::Otc),
            "rotc" => Ok(Market::Rotc),
            other => Err(anyhow::anyhow!("unknown market: {other:?}")),
        }
    }
}

/// Convert a Gregorian year to the ROC (Minguo) year the upstream expects.
pub fn roc_year(year: i32) -> i32 {
    year - 1911
}

/// A company the registry says should disclose. Owned by an external
/// onboarding process; read-only for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRegistryEntry {
    pub stock_id: String,
    pub company_name: String,
    pub market: Market,
}

/// Canonical, normalized representation of one company's one-month revenue
/// disclosure. Uniquely identified by (stock_id, year, month).
///
/// All six revenue figures are optional: the upstream marks undisclosed
/// values with a dash, which is distinct from a disclosed zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub stock_id: String,
    pub company_name: String,
    /// Gregorian year.
    pub year: i32,
    /// 1-12.
    pub month: u32,
    pub market: Market,
    pub revenue: Option<i64>,
    pub revenue_last_year: Option<i64>,
    pub revenue_change_percent: Option<f64>,
    pub cumulative_revenue: Option<i64>,
    pub cumulative_revenue_last_year: Option<i64>,
    pub cumulative_change_percent: Option<f64>,
    /// The raw upstream row, retained verbatim for forensic replay.
    pub raw: RawRow,
    pub created_at: DateTime<Utc>,
}

impl RevenueRecord {
    /// Pure projection into the Chinese-keyed view the query API reads.
    /// The localized view is never authored independently, so the two
    /// schemas cannot drift.
    pub fn localized(&self) -> LocalizedRevenueRecord {
        LocalizedRevenueRecord {
            stock_id: self.stock_id.clone(),
            year: self.year,
            month: self.month,
            market: self.market,
            company_id: self.stock_id.clone(),
            company_name: self.company_name.clone(),
            revenue: self.revenue,
            revenue_last_year: self.revenue_last_year,
            revenue_change_percent: self.revenue_change_percent,
            cumulative_revenue: self.cumulative_revenue,
            cumulative_revenue_last_year: self.cumulative_revenue_last_year,
            cumulative_change_percent: self.cumulative_change_percent,
        }
    }
}

/// Query-facing mirror of [`RevenueRecord`] keyed with the Chinese field
/// names downstream readers expect. The creation timestamp lives in its own
/// store column, not in this document, so re-upserts stay byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedRevenueRecord {
    #[serde(rename = "stockId")]
    pub stock_id: String,
    pub year: i32,
    pub month: u32,
    pub market: Market,
    #[serde(rename = "公司代號")]
    pub company_id: String,
    #[serde(rename = "公司名稱")]
    pub company_name: String,
    #[serde(rename = "營業收入")]
    pub revenue: Option<i64>,
    #[serde(rename = "去年同月營收")]
    pub revenue_last_year: Option<i64>,
    #[serde(rename = "營收年增率(%)")]
    pub revenue_change_percent: Option<f64>,
    #[serde(rename = "本年累計營收")]
    pub cumulative_revenue: Option<i64>,
    #[serde(rename = "去年累計營收")]
    pub cumulative_revenue_last_year: Option<i64>,
    #[serde(rename = "累計年增率(%)")]
    pub cumulative_change_percent: Option<f64>,
}

/// A registry company with no disclosure in the requested period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCompany {
    pub stock_id: String,
    pub company_name: String,
    pub market: Market,
}

/// Result of one ingestion run. Ephemeral; never persisted.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestionSummary {
    /// Records successfully written across all markets.
    pub total: usize,
    /// Successful writes per market. Markets whose fetch failed are absent.
    pub per_market: BTreeMap<Market, usize>,
    /// Registry companies with no disclosure this period, ascending stock id.
    pub missing: Vec<MissingCompany>,
    /// Markets whose fetch failed, with the terminal failure reason.
    pub failed_markets: BTreeMap<Market, String>,
    /// Markets never started because the run was cancelled.
    pub skipped_markets: Vec<Market>,
    /// Rows dropped because they could not be normalized.
    pub normalization_failures: usize,
    /// Records dropped because the store rejected them after retry.
    pub write_failures: usize,
}

/// Configuration for the application, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub mops_base_url: String,
    pub rate_limit_per_minute: u32,
    pub fetch_retry_attempts: u32,
    pub max_concurrent_markets: usize,
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    /// A variable that is set but does not parse is an error, not a
    /// silent fallback to the default.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "revenue.db".to_string()),
            mops_base_url: std::env::var("MOPS_BASE_URL")
                .unwrap_or_else(|_| "https://mops.twse.com.tw".to_string()),
            rate_limit_per_minute: env_setting("RATE_LIMIT_PER_MINUTE", 30)?,
            fetch_retry_attempts: env_setting("FETCH_RETRY_ATTEMPTS", 3)?,
            max_concurrent_markets: env_setting("MAX_CONCURRENT_MARKETS", 2)?,
        })
    }
}

fn env_setting<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is not usable: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn market_round_trip() {
        for market in Market::all() {
            assert_eq!(market.as_str().parse::<Market>().unwrap(), market);
        }
        assert!("nasdaq".parse::<Market>().is_err());
        assert_eq!(Market::Otc.label(), "上櫃");
    }

    #[test]
    fn roc_year_conversion() {
        assert_eq!(roc_year(2024), 113);
        assert_eq!(roc_year(1912), 1);
    }

    fn sample_record() -> RevenueRecord {
        RevenueRecord {
            stock_id: "2330".to_string(),
            company_name: "台積電".to_string(),
            year: 2024,
            month: 11,
            market: Market::Sii,
            revenue: Some(276_058_726),
            revenue_last_year: Some(206_026_144),
            revenue_change_percent: Some(33.99),
            cumulative_revenue: Some(2_616_154_468),
            cumulative_revenue_last_year: Some(1_961_905_299),
            cumulative_change_percent: Some(33.34),
            raw: RawRow::new(),
            created_at: Utc.with_ymd_and_hms(2024, 12, 10, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn localized_projection_mirrors_canonical() {
        let record = sample_record();
        let localized = record.localized();

        assert_eq!(localized.company_id, record.stock_id);
        assert_eq!(localized.revenue, record.revenue);
        assert_eq!(localized.cumulative_change_percent, record.cumulative_change_percent);

        let doc = serde_json::to_value(&localized).unwrap();
        assert_eq!(doc["公司代號"], "2330");
        assert_eq!(doc["營業收入"], serde_json::json!(276_058_726i64));
        assert_eq!(doc["累計年增率(%)"], serde_json::json!(33.34));
        assert_eq!(doc["market"], "sii");
        // createdAt deliberately lives outside the document
        assert!(doc.get("createdAt").is_none());
    }

    #[test]
    fn env_settings_parse_or_error() {
        std::env::set_var("TEST_RATE_SETTING", " 45 ");
        assert_eq!(env_setting("TEST_RATE_SETTING", 30u32).unwrap(), 45);

        std::env::set_var("TEST_RATE_SETTING_BAD", "fast");
        let err = env_setting("TEST_RATE_SETTING_BAD", 30u32).unwrap_err();
        assert!(err.to_string().contains("TEST_RATE_SETTING_BAD"));

        assert_eq!(env_setting("TEST_RATE_SETTING_ABSENT", 7usize).unwrap(), 7);
    }

    #[test]
    fn config_has_sane_defaults() {
        let config = Config::from_env().unwrap();
        assert!(config.fetch_retry_attempts >= 1);
        assert!(config.max_concurrent_markets >= 1);
        assert!(config.mops_base_url.starts_with("http"));
    }
}
