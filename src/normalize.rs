//! Conversion of raw upstream rows into canonical revenue records.
//!
//! The upstream field names drift across markets and periods, so every
//! logical field is resolved from a list of candidate keys. Values arrive
//! as strings with thousands separators, stray whitespace, or a dash
//! standing for "not applicable"; the dash maps to `None`, never to zero,
//! because zero is a valid disclosed figure.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::NormalizeError;
use crate::models::{Market, RawRow, RevenueRecord};

const STOCK_ID_KEYS: &[&str] = &["公司代號", "公司 代號"];
const COMPANY_NAME_KEYS: &[&str] = &["公司名稱", "公司 名稱"];
const REVENUE_KEYS: &[&str] = &["營業收入-當月營收", "當月營收", "營業收入"];
const REVENUE_LAST_YEAR_KEYS: &[&str] =
    &["營業收入-去年當月營收", "去年當月營收", "去年同月營收", "去年同月"];
const REVENUE_CHANGE_KEYS: &[&str] = &[
    "營業收入-去年同月增減(%)",
    "去年同月增減(%)",
    "營收年增率(%)",
    "增減百分比",
];
const CUMULATIVE_KEYS: &[&str] = &[
    "累計營業收入-當月累計營收",
    "當月累計營收",
    "本年累計營收",
    "本年累計",
];
const CUMULATIVE_LAST_YEAR_KEYS: &[&str] =
    &["累計營業收入-去年累計營收", "去年累計營收", "去年累計"];
const CUMULATIVE_CHANGE_KEYS: &[&str] = &[
    "累計營業收入-前期比較增減(%)",
    "前期比較增減(%)",
    "累計年增率(%)",
    "累計增減百分比",
];

/// Grand-total rows the upstream appends to each page. Not disclosures.
pub fn is_total_row(row: &RawRow) -> bool {
    matches!(string_field(row, STOCK_ID_KEYS).as_deref(), Some("合計") | Some("總計"))
}

/// Normalize one raw row into a canonical record. `now` becomes the
/// record's creation timestamp; the store preserves the original timestamp
/// on re-upsert.
pub fn normalize(
    row: &RawRow,
    market: Market,
    year: i32,
    month: u32,
    now: DateTime<Utc>,
) -> Result<RevenueRecord, NormalizeError> {
    let stock_id = string_field(row, STOCK_ID_KEYS)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingStockId)?;
    let company_name = string_field(row, COMPANY_NAME_KEYS).unwrap_or_default();

    Ok(RevenueRecord {
        stock_id,
        company_name,
        year,
        month,
        market,
        revenue: amount_field(row, REVENUE_KEYS, "revenue")?,
        revenue_last_year: amount_field(row, REVENUE_LAST_YEAR_KEYS, "revenue_last_year")?,
        revenue_change_percent: percent_field(row, REVENUE_CHANGE_KEYS, "revenue_change_percent")?,
        cumulative_revenue: amount_field(row, CUMULATIVE_KEYS, "cumulative_revenue")?,
        cumulative_revenue_last_year: amount_field(
            row,
            CUMULATIVE_LAST_YEAR_KEYS,
            "cumulative_revenue_last_year",
        )?,
        cumulative_change_percent: percent_field(
            row,
            CUMULATIVE_CHANGE_KEYS,
            "cumulative_change_percent",
        )?,
        raw: row.clone(),
        created_at: now,
    })
}

fn lookup<'a>(row: &'a RawRow, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| row.get(*k))
}

fn string_field(row: &RawRow, keys: &[&str]) -> Option<String> {
    lookup(row, keys).and_then(|v| match v {
        Value::String(s) => Some(clean(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Strip whitespace, non-breaking spaces, and thousands separators.
fn clean(text: &str) -> String {
    text.trim()
        .replace('\u{a0}', "")
        .replace(',', "")
        .trim()
        .to_string()
}

fn is_placeholder(text: &str) -> bool {
    matches!(text, "" | "-" | "－" | "—")
}

/// A revenue amount: a non-negative integer, or `None` when undisclosed.
fn amount_field(
    row: &RawRow,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<i64>, NormalizeError> {
    let value = match lookup(row, keys) {
        Some(v) => v,
        None => return Ok(None),
    };

    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let cleaned = clean(s);
            if is_placeholder(&cleaned) {
                return Ok(None);
            }
            cleaned.parse::<i64>().ok().or_else(|| {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };

    match parsed {
        Some(n) if n >= 0 => Ok(Some(n)),
        _ => Err(NormalizeError::BadNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// A percent figure: signed, decimal precision kept as disclosed.
fn percent_field(
    row: &RawRow,
    keys: &[&str],
    field: &'static str,
) -> Result<Option<f64>, NormalizeError> {
    let value = match lookup(row, keys) {
        Some(v) => v,
        None => return Ok(None),
    };

    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = clean(s);
            let cleaned = cleaned.strip_suffix('%').unwrap_or(&cleaned);
            if is_placeholder(cleaned) {
                return Ok(None);
            }
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(f) => Ok(Some(f)),
        None => Err(NormalizeError::BadNumber {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRow {
        value.as_object().unwrap().clone()
    }

    fn full_row() -> RawRow {
        raw(json!({
            "出表日期": "1131210",
            "資料年月": "11311",
            "公司代號": "2330",
            "公司名稱": "台積電",
            "營業收入-當月營收": "276,058,726",
            "營業收入-去年當月營收": "206,026,144",
            "營業收入-去年同月增減(%)": "33.99",
            "累計營業收入-當月累計營收": "2,616,154,468",
            "累計營業收入-去年累計營收": "1,961,905,299",
            "累計營業收入-前期比較增減(%)": "-3.20",
        }))
    }

    #[test]
    fn parses_separators_and_preserves_sign() {
        let record = normalize(&full_row(), Market::Sii, 2024, 11, Utc::now()).unwrap();

        assert_eq!(record.stock_id, "2330");
        assert_eq!(record.company_name, "台積電");
        assert_eq!(record.revenue, Some(276_058_726));
        assert_eq!(record.revenue_last_year, Some(206_026_144));
        assert_eq!(record.revenue_change_percent, Some(33.99));
        assert_eq!(record.cumulative_change_percent, Some(-3.20));
        assert_eq!(record.market, Market::Sii);
        // the raw row rides along verbatim
        assert_eq!(record.raw.get("出表日期").unwrap(), "1131210");
    }

    #[test]
    fn dash_means_undisclosed_not_zero() {
        let row = raw(json!({
            "公司代號": "6547",
            "公司名稱": "某公司",
            "營業收入-當月營收": "-",
            "營業收入-去年當月營收": "0",
            "營業收入-去年同月增減(%)": "－",
        }));
        let record = normalize(&row, Market::Rotc, 2024, 11, Utc::now()).unwrap();

        assert_eq!(record.revenue, None);
        assert_eq!(record.revenue_last_year, Some(0));
        assert_eq!(record.revenue_change_percent, None);
    }

    #[test]
    fn alternate_upstream_keys_resolve() {
        let row = raw(json!({
            "公司代號": "8069",
            "公司名稱": "元太",
            "當月營收": " 3,101 ",
            "去年同月營收": 2900,
            "營收年增率(%)": "+6.93",
        }));
        let record = normalize(&row, Market::Otc, 2024, 11, Utc::now()).unwrap();

        assert_eq!(record.revenue, Some(3101));
        assert_eq!(record.revenue_last_year, Some(2900));
        assert_eq!(record.revenue_change_percent, Some(6.93));
        assert_eq!(record.cumulative_revenue, None);
    }

    #[test]
    fn missing_identifier_is_an_error() {
        let row = raw(json!({"公司名稱": "無代號", "營業收入": "123"}));
        assert_eq!(
            normalize(&row, Market::Sii, 2024, 11, Utc::now()).unwrap_err(),
            NormalizeError::MissingStockId
        );
    }

    #[test]
    fn garbage_in_numeric_field_is_an_error() {
        let row = raw(json!({
            "公司代號": "1101",
            "公司名稱": "台泥",
            "營業收入-當月營收": "n/a",
        }));
        let err = normalize(&row, Market::Sii, 2024, 11, Utc::now()).unwrap_err();
        assert!(matches!(err, NormalizeError::BadNumber { field: "revenue", .. }));
    }

    #[test]
    fn negative_revenue_is_rejected() {
        let row = raw(json!({
            "公司代號": "1101",
            "公司名稱": "台泥",
            "營業收入-當月營收": "-500",
        }));
        assert!(normalize(&row, Market::Sii, 2024, 11, Utc::now()).is_err());
    }

    #[test]
    fn total_rows_are_recognized() {
        let total = raw(json!({"公司代號": "合計", "營業收入-當月營收": "9,999"}));
        assert!(is_total_row(&total));
        assert!(!is_total_row(&full_row()));
    }
}
