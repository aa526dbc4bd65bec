//! Risk attribution and sensitivity metrics
//!
//! Quantifies how portfolio VaR responds to weight changes:
//! - Incremental VaR: small weight increase in one asset
//! - Marginal VaR: complete removal of one asset
//! - Relative VaR: spread against a benchmark series
//! - Covariance-based volatility/VaR contributions via the marginal risk
//!   vector (Σw)/σ_p
//!
//! Every perturbation re-runs the same aggregation and estimation path as
//! the base portfolio, so sensitivities stay consistent with the point
//! estimates they are compared against.

use crate::error::{Result, RiskError};
use crate::returns::portfolio_returns;
use crate::series::{ReturnPanel, ReturnSeries};
use crate::var::{standard_normal, RiskEstimate, RiskMetricCalculator, VarConfig, VarMethod};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::ContinuousCDF;
use std::collections::HashMap;

/// Covariance estimator used for volatility attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceEstimator {
    /// Ledoit-Wolf shrinkage (requires the `shrinkage` feature)
    #[default]
    LedoitWolf,
    /// Plain unbiased sample covariance
    Sample,
}

/// Attribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Weight bump used by incremental VaR
    pub delta: f64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self { delta: 0.01 }
    }
}

/// Change in portfolio VaR from bumping one asset's weight by delta
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalVar {
    pub asset: String,
    /// VaR(perturbed) − VaR(base)
    pub incremental_var: f64,
}

/// Change in portfolio VaR from removing one asset entirely.
/// NaN for a single-asset portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginalVar {
    pub asset: String,
    pub marginal_var: f64,
}

/// VaR/ES of the portfolio-minus-benchmark spread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeVarReport {
    pub var: RiskEstimate,
    pub es: RiskEstimate,
    /// Number of shared dates the spread was computed over
    pub observations: usize,
}

/// One asset's share of portfolio volatility and VaR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContribution {
    pub asset: String,
    pub weight: f64,
    /// Marginal contribution to volatility, (Σw)_i / σ_p
    pub marginal_volatility: f64,
    /// weight × marginal contribution
    pub volatility_contribution: f64,
    /// Volatility contribution scaled to VaR units by the normal quantile;
    /// NaN for methods without a normal-quantile representation
    pub var_contribution: f64,
}

/// Covariance-based attribution summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityAttribution {
    pub portfolio_volatility: f64,

    /// Shrinkage intensity when Ledoit-Wolf was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shrinkage: Option<f64>,

    pub contributions: Vec<RiskContribution>,
}

/// Sensitivity and decomposition engine
#[derive(Debug, Clone, Default)]
pub struct RiskAttributor {
    config: AttributionConfig,
    calculator: RiskMetricCalculator,
}

impl RiskAttributor {
    pub fn new(config: AttributionConfig, var_config: VarConfig) -> Self {
        Self {
            config,
            calculator: RiskMetricCalculator::new(var_config),
        }
    }

    /// Incremental VaR per asset: bump the asset's weight by `delta`
    /// (clamped at zero), renormalize, and re-estimate portfolio VaR.
    pub fn incremental_var(
        &self,
        returns: &ReturnPanel,
        assets: &[String],
        weights: Option<&HashMap<String, f64>>,
        alpha: f64,
        method: VarMethod,
    ) -> Result<Vec<IncrementalVar>> {
        let (selected, base_weights) = select_and_normalize(returns, assets, weights)?;
        let base_var = self.portfolio_var(returns, &selected, &base_weights, alpha, method)?;

        let mut results = Vec::with_capacity(selected.len());
        for asset in &selected {
            let mut perturbed = base_weights.clone();
            if let Some(w) = perturbed.get_mut(asset) {
                *w = (*w + self.config.delta).max(0.0);
            }

            let var = self.portfolio_var(returns, &selected, &perturbed, alpha, method)?;
            results.push(IncrementalVar {
                asset: asset.clone(),
                incremental_var: var - base_var,
            });
        }
        Ok(results)
    }

    /// Marginal VaR per asset: remove the asset, renormalize the remaining
    /// weights, and re-estimate. A single-asset portfolio has nothing to
    /// renormalize against, so every entry is NaN rather than an error.
    pub fn marginal_var(
        &self,
        returns: &ReturnPanel,
        assets: &[String],
        weights: Option<&HashMap<String, f64>>,
        alpha: f64,
        method: VarMethod,
    ) -> Result<Vec<MarginalVar>> {
        let (selected, base_weights) = select_and_normalize(returns, assets, weights)?;

        if selected.len() == 1 {
            return Ok(vec![MarginalVar {
                asset: selected[0].clone(),
                marginal_var: f64::NAN,
            }]);
        }

        let base_var = self.portfolio_var(returns, &selected, &base_weights, alpha, method)?;

        let mut results = Vec::with_capacity(selected.len());
        for asset in &selected {
            let remaining: Vec<String> =
                selected.iter().filter(|a| *a != asset).cloned().collect();
            let mut reduced = base_weights.clone();
            reduced.remove(asset);

            let var = self.portfolio_var(returns, &remaining, &reduced, alpha, method)?;
            results.push(MarginalVar {
                asset: asset.clone(),
                marginal_var: var - base_var,
            });
        }
        Ok(results)
    }

    /// Relative VaR: align portfolio and benchmark on shared dates and
    /// estimate the risk of the spread (portfolio − benchmark).
    pub fn relative_var(
        &self,
        portfolio: &ReturnSeries,
        benchmark: &ReturnSeries,
        alpha: f64,
        method: VarMethod,
    ) -> Result<RelativeVarReport> {
        let benchmark_by_date: HashMap<_, _> = benchmark
            .dates
            .iter()
            .zip(benchmark.values.iter())
            .map(|(d, v)| (*d, *v))
            .collect();

        let spread: Vec<f64> = portfolio
            .dates
            .iter()
            .zip(portfolio.values.iter())
            .filter_map(|(d, p)| benchmark_by_date.get(d).map(|b| p - b))
            .collect();

        if spread.is_empty() {
            return Err(RiskError::InvalidInput(
                "Portfolio and benchmark series share no dates".to_string(),
            ));
        }

        Ok(RelativeVarReport {
            var: self.calculator.var(&spread, alpha, method)?,
            es: self.calculator.es(&spread, alpha, method)?,
            observations: spread.len(),
        })
    }

    /// Covariance-based volatility and VaR contributions.
    ///
    /// Marginal contribution to volatility is `(Σw)_i / σ_p`; each asset
    /// contributes `w_i` times its marginal. The VaR contribution scales by
    /// the normal quantile and is only defined for the `std`/`ewma`
    /// methods, and NaN otherwise.
    pub fn risk_contributions(
        &self,
        returns: &ReturnPanel,
        assets: &[String],
        weights: Option<&HashMap<String, f64>>,
        alpha: f64,
        method: VarMethod,
        estimator: CovarianceEstimator,
    ) -> Result<VolatilityAttribution> {
        let (selected, base_weights) = select_and_normalize(returns, assets, weights)?;
        let panel = complete_rows(returns, &selected)?;

        let (covariance, shrinkage) = match estimator {
            CovarianceEstimator::LedoitWolf => ledoit_wolf(&panel)?,
            CovarianceEstimator::Sample => (sample_covariance(&panel), None),
        };

        let w = DVector::from_vec(
            selected
                .iter()
                .map(|a| base_weights[a])
                .collect::<Vec<f64>>(),
        );

        let variance = (&w.transpose() * &covariance * &w)[(0, 0)];
        if !(variance > 0.0) {
            return Err(RiskError::CalculationError(format!(
                "Portfolio variance is not positive: {variance}"
            )));
        }
        let sigma_p = variance.sqrt();

        let marginal = &covariance * &w;
        let z = match method {
            VarMethod::Std | VarMethod::Ewma => {
                Some(standard_normal()?.inverse_cdf(1.0 - alpha))
            }
            _ => None,
        };

        let contributions = selected
            .iter()
            .enumerate()
            .map(|(i, asset)| {
                let marginal_volatility = marginal[i] / sigma_p;
                let volatility_contribution = w[i] * marginal_volatility;
                RiskContribution {
                    asset: asset.clone(),
                    weight: w[i],
                    marginal_volatility,
                    volatility_contribution,
                    var_contribution: z
                        .map(|z| -z * volatility_contribution)
                        .unwrap_or(f64::NAN),
                }
            })
            .collect();

        Ok(VolatilityAttribution {
            portfolio_volatility: sigma_p,
            shrinkage,
            contributions,
        })
    }

    fn portfolio_var(
        &self,
        returns: &ReturnPanel,
        assets: &[String],
        weights: &HashMap<String, f64>,
        alpha: f64,
        method: VarMethod,
    ) -> Result<f64> {
        let series = portfolio_returns(returns, assets, Some(weights))?;
        Ok(self.calculator.var(&series.values, alpha, method)?.value)
    }
}

/// Resolve the requested assets against the panel and produce normalized
/// base weights over that selection (equal weighting when none supplied).
fn select_and_normalize(
    returns: &ReturnPanel,
    assets: &[String],
    weights: Option<&HashMap<String, f64>>,
) -> Result<(Vec<String>, HashMap<String, f64>)> {
    let selected: Vec<String> = assets
        .iter()
        .filter(|a| returns.column(a).is_some())
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(RiskError::InvalidInput(format!(
            "None of the requested assets {:?} are present in the return panel",
            assets
        )));
    }

    let raw: Vec<f64> = match weights {
        None => vec![1.0 / selected.len() as f64; selected.len()],
        Some(map) => selected
            .iter()
            .map(|a| map.get(a).copied().unwrap_or(0.0))
            .collect(),
    };

    let sum: f64 = raw.iter().sum();
    if !(sum > 0.0) {
        return Err(RiskError::InvalidInput(format!(
            "Supplied weights must sum to a positive value, got {sum}"
        )));
    }

    let normalized = selected
        .iter()
        .cloned()
        .zip(raw.iter().map(|w| w / sum))
        .collect();
    Ok((selected, normalized))
}

/// Asset-major matrix over dates where every selected asset has a present
/// return; covariance estimation needs complete observations.
fn complete_rows(returns: &ReturnPanel, selected: &[String]) -> Result<Vec<Vec<f64>>> {
    let cols: Vec<usize> = selected
        .iter()
        .filter_map(|a| returns.column(a))
        .collect();

    let mut panel = vec![Vec::new(); cols.len()];
    for row in &returns.values {
        if cols.iter().all(|c| row[*c].is_finite()) {
            for (k, c) in cols.iter().enumerate() {
                panel[k].push(row[*c]);
            }
        }
    }

    if panel[0].len() < 2 {
        return Err(RiskError::InsufficientData(
            "Fewer than 2 complete observations for covariance estimation".to_string(),
        ));
    }
    Ok(panel)
}

#[cfg(feature = "shrinkage")]
fn ledoit_wolf(panel: &[Vec<f64>]) -> Result<(DMatrix<f64>, Option<f64>)> {
    let lw = crate::shrinkage::ledoit_wolf_covariance(panel)?;
    Ok((lw.covariance, Some(lw.shrinkage)))
}

#[cfg(not(feature = "shrinkage"))]
fn ledoit_wolf(_panel: &[Vec<f64>]) -> Result<(DMatrix<f64>, Option<f64>)> {
    Err(RiskError::DependencyUnavailable(
        "Ledoit-Wolf shrinkage is not compiled in (enable the `shrinkage` feature)".to_string(),
    ))
}

fn sample_covariance(panel: &[Vec<f64>]) -> DMatrix<f64> {
    let n = panel.len();
    let t = panel[0].len();

    let means: Vec<f64> = panel
        .iter()
        .map(|series| series.iter().sum::<f64>() / t as f64)
        .collect();

    let mut cov = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let c: f64 = panel[i]
                .iter()
                .zip(panel[j].iter())
                .map(|(x, y)| (x - means[i]) * (y - means[j]))
                .sum::<f64>()
                / (t - 1) as f64;
            cov[(i, j)] = c;
            cov[(j, i)] = c;
        }
    }
    cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Days::new(day as u64)
    }

    fn random_panel(n_obs: usize, seed: u64) -> ReturnPanel {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.01).unwrap();
        let values = (0..n_obs)
            .map(|_| {
                let common: f64 = normal.sample(&mut rng);
                vec![
                    0.8 * common + 0.4 * normal.sample(&mut rng),
                    0.5 * common + 0.6 * normal.sample(&mut rng),
                    normal.sample(&mut rng),
                ]
            })
            .collect();

        ReturnPanel::new(
            (0..n_obs as u32).map(d).collect(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            values,
        )
        .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_incremental_var_reports_every_asset() {
        let panel = random_panel(150, 1);
        let attributor = RiskAttributor::default();
        let results = attributor
            .incremental_var(&panel, &names(&["A", "B", "C"]), None, 0.95, VarMethod::Std)
            .unwrap();

        assert_eq!(results.len(), 3);
        for r in &results {
            assert!(r.incremental_var.is_finite());
        }
    }

    #[test]
    fn test_incremental_var_zero_delta_is_zero() {
        let panel = random_panel(150, 2);
        let attributor = RiskAttributor::new(
            AttributionConfig { delta: 0.0 },
            VarConfig::default(),
        );
        let results = attributor
            .incremental_var(&panel, &names(&["A", "B"]), None, 0.95, VarMethod::Std)
            .unwrap();
        for r in &results {
            assert_relative_eq!(r.incremental_var, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_marginal_var_single_asset_is_nan() {
        let panel = random_panel(150, 3);
        let attributor = RiskAttributor::default();
        let results = attributor
            .marginal_var(&panel, &names(&["A"]), None, 0.95, VarMethod::Historical)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].marginal_var.is_nan());
    }

    #[test]
    fn test_marginal_var_multi_asset() {
        let panel = random_panel(200, 4);
        let attributor = RiskAttributor::default();
        let results = attributor
            .marginal_var(&panel, &names(&["A", "B", "C"]), None, 0.95, VarMethod::Std)
            .unwrap();

        assert_eq!(results.len(), 3);
        for r in &results {
            assert!(r.marginal_var.is_finite());
        }
    }

    #[test]
    fn test_relative_var_identical_series_is_zero() {
        let panel = random_panel(150, 5);
        let series = portfolio_returns(&panel, &names(&["A", "B"]), None).unwrap();

        let attributor = RiskAttributor::default();
        let report = attributor
            .relative_var(&series, &series, 0.95, VarMethod::Historical)
            .unwrap();

        assert_relative_eq!(report.var.value, 0.0, epsilon = 1e-12);
        assert_relative_eq!(report.es.value, 0.0, epsilon = 1e-12);
        assert_eq!(report.observations, series.len());
    }

    #[test]
    fn test_relative_var_disjoint_dates_rejected() {
        let a = ReturnSeries::new(vec![d(0), d(1)], vec![0.01, -0.02]).unwrap();
        let b = ReturnSeries::new(vec![d(10), d(11)], vec![0.01, -0.02]).unwrap();

        let attributor = RiskAttributor::default();
        let result = attributor.relative_var(&a, &b, 0.95, VarMethod::Historical);
        assert!(matches!(result, Err(RiskError::InvalidInput(_))));
    }

    #[test]
    fn test_volatility_contributions_sum_to_portfolio_volatility() {
        let panel = random_panel(250, 6);
        let attributor = RiskAttributor::default();
        let attribution = attributor
            .risk_contributions(
                &panel,
                &names(&["A", "B", "C"]),
                None,
                0.99,
                VarMethod::Std,
                CovarianceEstimator::Sample,
            )
            .unwrap();

        let total: f64 = attribution
            .contributions
            .iter()
            .map(|c| c.volatility_contribution)
            .sum();
        // Euler decomposition: contributions sum to σ_p exactly
        assert_relative_eq!(total, attribution.portfolio_volatility, epsilon = 1e-10);
        assert!(attribution.shrinkage.is_none());
    }

    #[test]
    fn test_var_contribution_nan_for_historical() {
        let panel = random_panel(250, 7);
        let attributor = RiskAttributor::default();
        let attribution = attributor
            .risk_contributions(
                &panel,
                &names(&["A", "B"]),
                None,
                0.99,
                VarMethod::Historical,
                CovarianceEstimator::Sample,
            )
            .unwrap();

        for c in &attribution.contributions {
            assert!(c.var_contribution.is_nan());
            assert!(c.volatility_contribution.is_finite());
        }
    }

    #[cfg(feature = "shrinkage")]
    #[test]
    fn test_ledoit_wolf_attribution_reports_intensity() {
        let panel = random_panel(120, 8);
        let attributor = RiskAttributor::default();
        let attribution = attributor
            .risk_contributions(
                &panel,
                &names(&["A", "B", "C"]),
                None,
                0.99,
                VarMethod::Ewma,
                CovarianceEstimator::LedoitWolf,
            )
            .unwrap();

        let shrinkage = attribution.shrinkage.unwrap();
        assert!((0.0..=1.0).contains(&shrinkage));
        for c in &attribution.contributions {
            assert!(c.var_contribution > 0.0);
        }
    }

    #[test]
    fn test_unknown_assets_rejected() {
        let panel = random_panel(100, 9);
        let attributor = RiskAttributor::default();
        let result =
            attributor.incremental_var(&panel, &names(&["X"]), None, 0.95, VarMethod::Std);
        assert!(matches!(result, Err(RiskError::InvalidInput(_))));
    }
}
