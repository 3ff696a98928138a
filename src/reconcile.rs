//! Registry reconciliation: which known companies filed nothing this period.

use std::collections::HashSet;

use crate::models::{CompanyRegistryEntry, MissingCompany};

/// Diff the registry subset for the requested markets against the union of
/// stock ids successfully normalized this run. A company fetched under the
/// wrong market still counts as seen. The result is sorted ascending by
/// stock id so output is diffable across runs.
pub fn reconcile(
    registry: &[CompanyRegistryEntry],
    seen: &HashSet<String>,
) -> Vec<MissingCompany> {
    let mut missing: Vec<MissingCompany> = registry
        .iter()
        .filter(|entry| !seen.contains(&entry.stock_id))
        .map(|entry| MissingCompany {
            stock_id: entry.stock_id.clone(),
            company_name: entry.company_name.clone(),
            market: entry.market,
        })
        .collect();

    missing.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
    missing
}
