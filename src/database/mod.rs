use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use crate::models::{CompanyRegistryEntry, Market, RawRow, RevenueRecord};

/// Store totals for operator visibility.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub companies: i64,
    pub revenue_rows: i64,
}

/// SQLite-backed store shared by the ingestion pipeline and the query API.
/// One handle per run; constructed before the run and closed after it.
#[derive(Clone)]
pub struct RevenueStore {
    pool: SqlitePool,
}

impl RevenueStore {
    /// Open (creating if missing) the database and ensure the schema exists.
    pub async fn open(database_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(database_path)
                    .create_if_missing(true),
            )
            .await?;

        // WAL keeps concurrent market writers from blocking each other
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                stock_id TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                market TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monthly_revenue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_id TEXT NOT NULL,
                company_name TEXT NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                market TEXT NOT NULL,
                revenue INTEGER,
                revenue_last_year INTEGER,
                revenue_change_percent REAL,
                cumulative_revenue INTEGER,
                cumulative_revenue_last_year INTEGER,
                cumulative_change_percent REAL,
                raw TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                UNIQUE(stock_id, year, month)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monthly_revenue_localized (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                market TEXT NOT NULL,
                document TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                UNIQUE(stock_id, year, month)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_monthly_revenue_period
             ON monthly_revenue(year, month, market)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_monthly_revenue_localized_period
             ON monthly_revenue_localized(year, month, market)",
        )
        .execute(&pool)
        .await?;

        info!("Store initialized at {}", database_path);
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Seed or refresh a registry entry. The registry is owned by the
    /// onboarding process; the pipeline itself only reads it.
    pub async fn upsert_company(&self, entry: &CompanyRegistryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (stock_id, company_name, market)
            VALUES (?, ?, ?)
            ON CONFLICT(stock_id) DO UPDATE SET
                company_name = excluded.company_name,
                market = excluded.market
            "#,
        )
        .bind(&entry.stock_id)
        .bind(&entry.company_name)
        .bind(entry.market.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Registry subset for the given markets, ascending stock id.
    pub async fn list_companies(&self, markets: &[Market]) -> Result<Vec<CompanyRegistryEntry>> {
        if markets.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; markets.len()].join(", ");
        let sql = format!(
            "SELECT stock_id, company_name, market FROM companies
             WHERE market IN ({placeholders}) ORDER BY stock_id"
        );

        let mut query = sqlx::query(&sql);
        for market in markets {
            query = query.bind(market.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut companies = Vec::with_capacity(rows.len());
        for row in rows {
            companies.push(CompanyRegistryEntry {
                stock_id: row.try_get("stock_id")?,
                company_name: row.try_get("company_name")?,
                market: Market::from_str(row.try_get::<String, _>("market")?.as_str())?,
            });
        }

        Ok(companies)
    }

    /// Upsert one record pair (canonical + localized projection) as a single
    /// transaction keyed by (stock_id, year, month). The two views commit or
    /// roll back together, so they can never diverge for the same key.
    /// `created_at` is written on first insert and left untouched afterwards.
    pub async fn upsert_revenue(&self, record: &RevenueRecord) -> Result<()> {
        let raw = serde_json::to_string(&record.raw)?;
        let document = serde_json::to_string(&record.localized())?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO monthly_revenue (
                stock_id, company_name, year, month, market,
                revenue, revenue_last_year, revenue_change_percent,
                cumulative_revenue, cumulative_revenue_last_year,
                cumulative_change_percent, raw, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_id, year, month) DO UPDATE SET
                company_name = excluded.company_name,
                market = excluded.market,
                revenue = excluded.revenue,
                revenue_last_year = excluded.revenue_last_year,
                revenue_change_percent = excluded.revenue_change_percent,
                cumulative_revenue = excluded.cumulative_revenue,
                cumulative_revenue_last_year = excluded.cumulative_revenue_last_year,
                cumulative_change_percent = excluded.cumulative_change_percent,
                raw = excluded.raw
            "#,
        )
        .bind(&record.stock_id)
        .bind(&record.company_name)
        .bind(record.year)
        .bind(record.month as i64)
        .bind(record.market.as_str())
        .bind(record.revenue)
        .bind(record.revenue_last_year)
        .bind(record.revenue_change_percent)
        .bind(record.cumulative_revenue)
        .bind(record.cumulative_revenue_last_year)
        .bind(record.cumulative_change_percent)
        .bind(&raw)
        .bind(record.created_at)
        .execute(&mut tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO monthly_revenue_localized (
                stock_id, year, month, market, document, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_id, year, month) DO UPDATE SET
                market = excluded.market,
                document = excluded.document
            "#,
        )
        .bind(&record.stock_id)
        .bind(record.year)
        .bind(record.month as i64)
        .bind(record.market.as_str())
        .bind(&document)
        .bind(record.created_at)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Canonical (analytic) view of one disclosure.
    pub async fn get_revenue(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<RevenueRecord>> {
        let row = sqlx::query(
            r#"
            SELECT stock_id, company_name, year, month, market,
                   revenue, revenue_last_year, revenue_change_percent,
                   cumulative_revenue, cumulative_revenue_last_year,
                   cumulative_change_percent, raw, created_at
            FROM monthly_revenue
            WHERE stock_id = ? AND year = ? AND month = ?
            "#,
        )
        .bind(stock_id)
        .bind(year)
        .bind(month as i64)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let raw: RawRow = serde_json::from_str(&row.try_get::<String, _>("raw")?)?;
        Ok(Some(RevenueRecord {
            stock_id: row.try_get("stock_id")?,
            company_name: row.try_get("company_name")?,
            year: row.try_get("year")?,
            month: row.try_get::<i64, _>("month")? as u32,
            market: Market::from_str(row.try_get::<String, _>("market")?.as_str())?,
            revenue: row.try_get("revenue")?,
            revenue_last_year: row.try_get("revenue_last_year")?,
            revenue_change_percent: row.try_get("revenue_change_percent")?,
            cumulative_revenue: row.try_get("cumulative_revenue")?,
            cumulative_revenue_last_year: row.try_get("cumulative_revenue_last_year")?,
            cumulative_change_percent: row.try_get("cumulative_change_percent")?,
            raw,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        }))
    }

    /// Localized (query-facing) view of one disclosure, as stored.
    pub async fn get_localized_document(
        &self,
        stock_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT document FROM monthly_revenue_localized
             WHERE stock_id = ? AND year = ? AND month = ?",
        )
        .bind(stock_id)
        .bind(year)
        .bind(month as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(
                &row.try_get::<String, _>("document")?,
            )?)),
            None => Ok(None),
        }
    }

    /// Stored disclosures for one period, optionally narrowed to a market.
    pub async fn count_revenue_for_period(
        &self,
        year: i32,
        month: u32,
        market: Option<Market>,
    ) -> Result<i64> {
        let count: i64 = match market {
            Some(market) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM monthly_revenue
                     WHERE year = ? AND month = ? AND market = ?",
                )
                .bind(year)
                .bind(month as i64)
                .bind(market.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM monthly_revenue WHERE year = ? AND month = ?",
                )
                .bind(year)
                .bind(month as i64)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count)
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;
        let revenue_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM monthly_revenue")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            companies,
            revenue_rows,
        })
    }
}
