//! Shared helpers for the integration suite: a wiremock MOPS upstream and a
//! throwaway SQLite store.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mops_revenue::api::MopsClient;
use mops_revenue::database::RevenueStore;
use mops_revenue::ingest::Ingestor;
use mops_revenue::models::{CompanyRegistryEntry, Config, Market};

pub const REVENUE_PATH: &str = "/mops/api/t21sc04_ifrs";

pub fn test_config(base_url: &str) -> Config {
    Config {
        database_path: String::new(),
        mops_base_url: base_url.to_string(),
        // keep the rate limiter delay negligible in tests
        rate_limit_per_minute: 60_000,
        fetch_retry_attempts: 2,
        max_concurrent_markets: 2,
    }
}

pub async fn open_store() -> (TempDir, RevenueStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("revenue.db");
    let store = RevenueStore::open(db_path.to_str().unwrap())
        .await
        .expect("open store");
    (dir, store)
}

pub fn ingestor(server: &MockServer, store: RevenueStore) -> Ingestor {
    let config = test_config(&server.uri());
    let client = MopsClient::new(&config).expect("client");
    Ingestor::new(Arc::new(client), store, &config)
}

pub async fn seed_registry(store: &RevenueStore, entries: &[(&str, &str, Market)]) {
    for (stock_id, name, market) in entries {
        store
            .upsert_company(&CompanyRegistryEntry {
                stock_id: stock_id.to_string(),
                company_name: name.to_string(),
                market: *market,
            })
            .await
            .expect("seed company");
    }
}

/// A raw MOPS row in the upstream's own field names, values as disclosed
/// (strings with separators).
pub fn revenue_row(stock_id: &str, name: &str, revenue: &str) -> Value {
    json!({
        "出表日期": "1131210",
        "資料年月": "11311",
        "公司代號": stock_id,
        "公司名稱": name,
        "營業收入-當月營收": revenue,
        "營業收入-去年當月營收": "900",
        "營業收入-去年同月增減(%)": "11.11",
        "累計營業收入-當月累計營收": "5,000",
        "累計營業收入-去年累計營收": "4,500",
        "累計營業收入-前期比較增減(%)": "-3.20",
    })
}

pub fn envelope(rows: Vec<Value>) -> Value {
    json!({
        "code": 200,
        "message": "OK",
        "result": { "data": rows }
    })
}

/// Mount a successful response for one market's period page.
pub async fn mount_market(server: &MockServer, market: Market, rows: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path(REVENUE_PATH))
        .and(body_partial_json(json!({ "TYPEK": market.as_str() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(rows)))
        .mount(server)
        .await;
}

/// Mount a bare HTTP status for one market.
pub async fn mount_market_status(server: &MockServer, market: Market, status: u16) {
    Mock::given(method("POST"))
        .and(path(REVENUE_PATH))
        .and(body_partial_json(json!({ "TYPEK": market.as_str() })))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
