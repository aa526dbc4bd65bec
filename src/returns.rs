//! Return aggregation
//!
//! Converts a price panel into per-asset return series and aggregates them
//! into a single portfolio return series under per-date weight
//! renormalization. Weights are always re-scaled over the assets that have
//! a present return on a given day, so the per-date weight vector sums to
//! one even when part of the panel is missing.

use crate::error::{Result, RiskError};
use crate::series::{PricePanel, ReturnPanel, ReturnSeries};
use std::collections::HashMap;
use tracing::debug;

/// Compute per-date percentage returns from a price panel.
///
/// Rows are sorted by date first. Price rows that are entirely missing are
/// dropped before differencing; ±infinity produced by zero-to-nonzero price
/// transitions is replaced with a missing value, and return rows left
/// entirely missing are dropped again.
pub fn compute_returns(prices: &PricePanel) -> Result<ReturnPanel> {
    if prices.dates.len() < 2 {
        return Err(RiskError::InsufficientData(
            "Need at least 2 price rows to compute returns".to_string(),
        ));
    }

    // Sort rows by date without assuming the input is ordered
    let mut order: Vec<usize> = (0..prices.dates.len()).collect();
    order.sort_by_key(|&i| prices.dates[i]);

    // Drop price rows with no observation at all
    let kept: Vec<usize> = order
        .into_iter()
        .filter(|&i| prices.values[i].iter().any(|v| v.is_finite()))
        .collect();

    if kept.len() < 2 {
        return Err(RiskError::InsufficientData(
            "Fewer than 2 usable price rows after dropping empty rows".to_string(),
        ));
    }

    let n_assets = prices.assets.len();
    let mut dates = Vec::with_capacity(kept.len() - 1);
    let mut values = Vec::with_capacity(kept.len() - 1);

    for w in kept.windows(2) {
        let prev = &prices.values[w[0]];
        let curr = &prices.values[w[1]];

        let mut row = Vec::with_capacity(n_assets);
        for a in 0..n_assets {
            let r = (curr[a] - prev[a]) / prev[a];
            // A zero previous price yields ±infinity; treat it as missing
            row.push(if r.is_finite() { r } else { f64::NAN });
        }

        if row.iter().any(|v| v.is_finite()) {
            dates.push(prices.dates[w[1]]);
            values.push(row);
        } else {
            debug!(date = %prices.dates[w[1]], "dropping all-missing return row");
        }
    }

    if values.is_empty() {
        return Err(RiskError::InsufficientData(
            "No usable return rows after differencing".to_string(),
        ));
    }

    ReturnPanel::new(dates, prices.assets.clone(), values)
}

/// Aggregate a return panel into a portfolio return series.
///
/// Selects the subset of `assets` present in the panel and fails with an
/// invalid-input error when none match. Supplied weights are normalized to
/// sum to one (equal weighting when `None`); their pre-normalization sum
/// must be positive. For every date, weights are masked to assets with a
/// present return that day and renormalized, so a missing security's
/// weight redistributes to the rest; missing returns contribute zero.
pub fn portfolio_returns(
    returns: &ReturnPanel,
    assets: &[String],
    weights: Option<&HashMap<String, f64>>,
) -> Result<ReturnSeries> {
    let selected: Vec<(usize, &String)> = assets
        .iter()
        .filter_map(|a| returns.column(a).map(|c| (c, a)))
        .collect();

    if selected.is_empty() {
        return Err(RiskError::InvalidInput(format!(
            "None of the requested assets {:?} are present in the return panel",
            assets
        )));
    }

    let base_weights = normalize_weights(&selected, weights)?;

    let mut dates = Vec::with_capacity(returns.dates.len());
    let mut values = Vec::with_capacity(returns.dates.len());

    for (row_idx, row) in returns.values.iter().enumerate() {
        // Per-date mask: only assets with a present return participate
        let mut masked_sum = 0.0;
        for (k, (col, _)) in selected.iter().enumerate() {
            if row[*col].is_finite() {
                masked_sum += base_weights[k];
            }
        }

        if masked_sum <= 0.0 {
            debug!(date = %returns.dates[row_idx], "no weighted asset available, skipping date");
            continue;
        }

        let mut acc = 0.0;
        for (k, (col, _)) in selected.iter().enumerate() {
            let r = row[*col];
            if r.is_finite() {
                acc += (base_weights[k] / masked_sum) * r;
            }
        }

        dates.push(returns.dates[row_idx]);
        values.push(acc);
    }

    if values.is_empty() {
        return Err(RiskError::InsufficientData(
            "No dates with any weighted asset available".to_string(),
        ));
    }

    ReturnSeries::new(dates, values)
}

/// Normalize supplied weights over the selected assets to sum to one;
/// equal weighting when no map is supplied.
fn normalize_weights(
    selected: &[(usize, &String)],
    weights: Option<&HashMap<String, f64>>,
) -> Result<Vec<f64>> {
    match weights {
        None => Ok(vec![1.0 / selected.len() as f64; selected.len()]),
        Some(map) => {
            let raw: Vec<f64> = selected
                .iter()
                .map(|(_, a)| map.get(*a).copied().unwrap_or(0.0))
                .collect();

            let sum: f64 = raw.iter().sum();
            if !(sum > 0.0) {
                return Err(RiskError::InvalidInput(format!(
                    "Supplied weights must sum to a positive value, got {}",
                    sum
                )));
            }

            Ok(raw.iter().map(|w| w / sum).collect())
        }
    }
}
