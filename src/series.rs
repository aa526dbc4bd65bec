//! Dated panels and series used throughout the engine
//!
//! All observation containers are plain in-memory records keyed by
//! `chrono::NaiveDate`. Missing observations are represented as `f64::NAN`
//! and are never imputed except where portfolio aggregation explicitly
//! documents a zero contribution.

use crate::error::{Result, RiskError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Rectangular panel of prices: one row per date, one column per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePanel {
    /// Observation dates, one per row
    pub dates: Vec<NaiveDate>,

    /// Asset identifiers, one per column
    pub assets: Vec<String>,

    /// Row-major values; `NAN` marks a missing observation
    pub values: Vec<Vec<f64>>,
}

impl PricePanel {
    /// Create a panel, validating the rectangular shape
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        validate_panel_shape(&dates, &assets, &values)?;
        Ok(Self {
            dates,
            assets,
            values,
        })
    }
}

/// Rectangular panel of per-asset returns, same layout as [`PricePanel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnPanel {
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl ReturnPanel {
    /// Create a panel, validating the rectangular shape
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        validate_panel_shape(&dates, &assets, &values)?;
        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    /// Column index of an asset, if present
    pub fn column(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }
}

/// A single dated return series (e.g., an aggregated portfolio)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl ReturnSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(RiskError::InvalidInput(format!(
                "Series has {} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        Ok(Self { dates, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn validate_panel_shape(dates: &[NaiveDate], assets: &[String], values: &[Vec<f64>]) -> Result<()> {
    if values.len() != dates.len() {
        return Err(RiskError::InvalidInput(format!(
            "Panel has {} rows but {} dates",
            values.len(),
            dates.len()
        )));
    }
    for (i, row) in values.iter().enumerate() {
        if row.len() != assets.len() {
            return Err(RiskError::InvalidInput(format!(
                "Row {} has {} values, expected {} (one per asset)",
                i,
                row.len(),
                assets.len()
            )));
        }
    }
    Ok(())
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// Matches the type-7 definition (the pandas/numpy default): for a sorted
/// sample of size n, the quantile at probability p sits at rank
/// `p * (n - 1)` and interpolates between the bracketing observations.
pub(crate) fn quantile(values: &[f64], p: f64) -> f64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    if sorted.len() == 1 {
        return sorted[0];
    }

    let rank = p.clamp(0.0, 1.0) * (sorted.len() as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let w = rank - lo as f64;
        sorted[lo] + w * (sorted[hi] - sorted[lo])
    }
}

pub(crate) fn sample_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (ddof = 1); 0.0 for fewer than two observations
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = sample_mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub(crate) fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Drop non-finite observations; used by the calculators so that a series
/// carrying a residual gap never poisons a sort or a sum.
pub(crate) fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}
