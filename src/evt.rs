//! Extreme Value Theory tail risk estimation
//!
//! Works on losses `L = −R`. A threshold `u` is placed at the
//! `threshold_quantile` quantile of losses and a Generalized Pareto
//! Distribution (location fixed at zero) is fitted by maximum likelihood to
//! the excesses above `u`. The likelihood is maximized by a coarse-to-fine
//! grid search over (shape ξ, scale β), with the exponential limit handling
//! ξ = 0.
//!
//! Small samples degrade gracefully: with fewer than `min_losses` total
//! observations or fewer than `min_excesses` threshold excesses the
//! estimator silently falls back to the historical method and flags the
//! result, rather than erroring.

use crate::error::{Result, RiskError};
use crate::series::{finite_values, quantile, sample_mean};
use crate::var::{EstimateDetails, RiskEstimate, RiskMetricCalculator, VarMethod};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shape values closer to zero than this use the exponential limit formulas
const SHAPE_EPS: f64 = 1e-8;

/// Tail estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvtConfig {
    /// Quantile of the loss distribution defining the threshold u
    pub threshold_quantile: f64,

    /// Minimum loss observations before a tail fit is attempted
    pub min_losses: usize,

    /// Minimum excesses above the threshold before a tail fit is attempted
    pub min_excesses: usize,
}

impl Default for EvtConfig {
    fn default() -> Self {
        Self {
            threshold_quantile: 0.9,
            min_losses: 50,
            min_excesses: 30,
        }
    }
}

/// EVT/GPD tail risk estimator
#[derive(Debug, Clone, Default)]
pub struct TailRiskEstimator {
    config: EvtConfig,
}

/// Fitted GPD tail, or the historical fallback marker
enum TailFit {
    Gpd {
        shape: f64,
        scale: f64,
        threshold: f64,
        excesses: usize,
    },
    Fallback {
        excesses: usize,
    },
}

impl TailRiskEstimator {
    pub fn new(config: EvtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvtConfig {
        &self.config
    }

    /// EVT Value at Risk (a positive loss)
    pub fn var(&self, returns: &[f64], alpha: f64) -> Result<RiskEstimate> {
        self.estimate(returns, alpha, false)
    }

    /// EVT Expected Shortfall. `+∞` when the fitted shape is ≥ 1: the tail
    /// expectation is genuinely infinite there, which is a valid output.
    pub fn es(&self, returns: &[f64], alpha: f64) -> Result<RiskEstimate> {
        self.estimate(returns, alpha, true)
    }

    fn estimate(&self, returns: &[f64], alpha: f64, want_es: bool) -> Result<RiskEstimate> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(RiskError::InvalidInput(format!(
                "Confidence level must be between 0 and 1, got {alpha}"
            )));
        }
        let q = self.config.threshold_quantile;
        if q <= 0.0 || q >= 1.0 {
            return Err(RiskError::InvalidInput(format!(
                "Threshold quantile must be between 0 and 1, got {q}"
            )));
        }

        let clean = finite_values(returns);
        if clean.is_empty() {
            return Err(RiskError::InvalidInput(
                "Return series has no finite observations".to_string(),
            ));
        }

        match self.fit_tail(&clean)? {
            TailFit::Gpd {
                shape,
                scale,
                threshold,
                excesses,
            } => {
                let p_tail = 1.0 - q;
                let var = gpd_var(threshold, shape, scale, p_tail, alpha);
                let value = if want_es {
                    gpd_es(var, threshold, shape, scale)
                } else {
                    var
                };

                Ok(RiskEstimate {
                    value,
                    alpha,
                    method: VarMethod::Evt,
                    details: EstimateDetails::Evt {
                        shape: Some(shape),
                        scale: Some(scale),
                        threshold: Some(threshold),
                        threshold_quantile: q,
                        excesses,
                        fallback: None,
                    },
                })
            }
            TailFit::Fallback { excesses } => {
                debug!(
                    n = clean.len(),
                    excesses, "sample too small for a tail fit, using historical"
                );
                let calc = RiskMetricCalculator::default();
                let hist = if want_es {
                    calc.es(&clean, alpha, VarMethod::Historical)?
                } else {
                    calc.var(&clean, alpha, VarMethod::Historical)?
                };

                Ok(RiskEstimate {
                    value: hist.value,
                    alpha,
                    method: VarMethod::Evt,
                    details: EstimateDetails::Evt {
                        shape: None,
                        scale: None,
                        threshold: None,
                        threshold_quantile: q,
                        excesses,
                        fallback: Some("historical".to_string()),
                    },
                })
            }
        }
    }

    fn fit_tail(&self, returns: &[f64]) -> Result<TailFit> {
        let losses: Vec<f64> = returns.iter().map(|r| -r).collect();
        let threshold = quantile(&losses, self.config.threshold_quantile);
        let excesses: Vec<f64> = losses
            .iter()
            .filter(|l| **l > threshold)
            .map(|l| l - threshold)
            .collect();

        if losses.len() < self.config.min_losses || excesses.len() < self.config.min_excesses {
            return Ok(TailFit::Fallback {
                excesses: excesses.len(),
            });
        }

        let (shape, scale) = fit_gpd_mle(&excesses)?;
        Ok(TailFit::Gpd {
            shape,
            scale,
            threshold,
            excesses: excesses.len(),
        })
    }
}

/// EVT VaR in loss units.
///
/// `u + (β/ξ)·((p_tail/(1−alpha))^ξ − 1)` for |ξ| above the epsilon,
/// `u + β·ln(p_tail/(1−alpha))` in the exponential limit.
fn gpd_var(threshold: f64, shape: f64, scale: f64, p_tail: f64, alpha: f64) -> f64 {
    let ratio = p_tail / (1.0 - alpha);
    if shape.abs() > SHAPE_EPS {
        threshold + (scale / shape) * (ratio.powf(shape) - 1.0)
    } else {
        threshold + scale * ratio.ln()
    }
}

/// Analytic EVT Expected Shortfall:
/// `(VaR + β − ξ·(VaR − u)) / (1 − ξ)` for ξ < 1, infinite otherwise.
fn gpd_es(var: f64, threshold: f64, shape: f64, scale: f64) -> f64 {
    if shape < 1.0 {
        (var + (scale - shape * (var - threshold))) / (1.0 - shape)
    } else {
        f64::INFINITY
    }
}

/// Maximum-likelihood GPD fit to threshold excesses (location 0).
///
/// Coarse grid over ξ ∈ [−0.45, 1.45] and β around the mean excess, then a
/// single refinement pass around the coarse optimum.
fn fit_gpd_mle(excesses: &[f64]) -> Result<(f64, f64)> {
    let mean_excess = sample_mean(excesses);
    if !(mean_excess > 0.0) {
        return Err(RiskError::CalculationError(
            "Threshold excesses are degenerate (non-positive mean)".to_string(),
        ));
    }

    let coarse = grid_max(
        excesses,
        -0.45,
        1.45,
        0.05,
        0.1 * mean_excess,
        3.0 * mean_excess,
        0.1 * mean_excess,
    );
    let (xi0, beta0) = coarse.ok_or_else(|| {
        RiskError::CalculationError("GPD likelihood surface is degenerate".to_string())
    })?;

    let refined = grid_max(
        excesses,
        xi0 - 0.05,
        xi0 + 0.05,
        0.005,
        (beta0 - 0.1 * mean_excess).max(0.01 * mean_excess),
        beta0 + 0.1 * mean_excess,
        0.01 * mean_excess,
    );

    Ok(refined.unwrap_or((xi0, beta0)))
}

fn grid_max(
    excesses: &[f64],
    xi_lo: f64,
    xi_hi: f64,
    xi_step: f64,
    beta_lo: f64,
    beta_hi: f64,
    beta_step: f64,
) -> Option<(f64, f64)> {
    let mut best: Option<((f64, f64), f64)> = None;

    let mut xi = xi_lo;
    while xi <= xi_hi + 1e-12 {
        let mut beta = beta_lo;
        while beta <= beta_hi + 1e-12 {
            let ll = gpd_log_likelihood(excesses, xi, beta);
            if ll.is_finite() && best.map_or(true, |(_, b)| ll > b) {
                best = Some(((xi, beta), ll));
            }
            beta += beta_step;
        }
        xi += xi_step;
    }

    best.map(|(params, _)| params)
}

/// GPD log-likelihood with location 0; −∞ outside the support.
fn gpd_log_likelihood(excesses: &[f64], xi: f64, beta: f64) -> f64 {
    if beta <= 0.0 {
        return f64::NEG_INFINITY;
    }

    let n = excesses.len() as f64;
    if xi.abs() < SHAPE_EPS {
        // Exponential limit
        let sum: f64 = excesses.iter().sum();
        return -n * beta.ln() - sum / beta;
    }

    let mut acc = 0.0;
    for &x in excesses {
        let t = 1.0 + xi * x / beta;
        if t <= 0.0 {
            return f64::NEG_INFINITY;
        }
        acc += t.ln();
    }
    -n * beta.ln() - (1.0 + 1.0 / xi) * acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn normal_returns(n: usize, sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Normal::new(0.0, sigma).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    /// Returns whose losses are GPD(xi, beta) excesses above zero
    fn gpd_losses(n: usize, xi: f64, beta: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u: f64 = rng.gen_range(1e-9..1.0);
                let loss = if xi.abs() < 1e-12 {
                    -beta * u.ln()
                } else {
                    (beta / xi) * (u.powf(-xi) - 1.0)
                };
                -loss
            })
            .collect()
    }

    #[test]
    fn test_short_series_falls_back_to_historical() {
        let returns = normal_returns(30, 0.01, 1);
        let est = TailRiskEstimator::default().var(&returns, 0.99).unwrap();

        let hist = RiskMetricCalculator::default()
            .var(&returns, 0.99, VarMethod::Historical)
            .unwrap();

        assert_relative_eq!(est.value, hist.value, epsilon = 1e-12);
        match est.details {
            EstimateDetails::Evt { ref fallback, .. } => {
                assert_eq!(fallback.as_deref(), Some("historical"));
            }
            _ => panic!("expected evt details"),
        }
    }

    #[test]
    fn test_few_excesses_falls_back() {
        // 100 observations leave ~10 excesses above the 0.9 quantile,
        // below the 30-excess floor
        let returns = normal_returns(100, 0.01, 2);
        let est = TailRiskEstimator::default().var(&returns, 0.99).unwrap();
        match est.details {
            EstimateDetails::Evt { ref fallback, .. } => {
                assert_eq!(fallback.as_deref(), Some("historical"));
            }
            _ => panic!("expected evt details"),
        }
    }

    #[test]
    fn test_large_sample_fits_tail() {
        let returns = normal_returns(2000, 0.01, 3);
        let est = TailRiskEstimator::default().var(&returns, 0.99).unwrap();

        assert!(est.value > 0.0);
        match est.details {
            EstimateDetails::Evt {
                shape,
                scale,
                threshold,
                fallback,
                excesses,
                ..
            } => {
                assert!(fallback.is_none());
                assert!(shape.is_some());
                assert!(scale.unwrap() > 0.0);
                assert!(threshold.unwrap() > 0.0);
                assert!(excesses >= 30);
            }
            _ => panic!("expected evt details"),
        }
    }

    #[test]
    fn test_gpd_fit_recovers_known_shape() {
        // Heavy tail: xi = 0.3. The threshold slices the sample, but GPD
        // excesses above a GPD threshold are GPD with the same shape.
        let returns = gpd_losses(5000, 0.3, 1.0, 4);
        let est = TailRiskEstimator::default().var(&returns, 0.99).unwrap();
        match est.details {
            EstimateDetails::Evt { shape, .. } => {
                assert!((shape.unwrap() - 0.3).abs() < 0.15);
            }
            _ => panic!("expected evt details"),
        }
    }

    #[test]
    fn test_es_exceeds_var_for_fitted_tail() {
        let returns = normal_returns(2000, 0.01, 5);
        let estimator = TailRiskEstimator::default();
        let var = estimator.var(&returns, 0.99).unwrap();
        let es = estimator.es(&returns, 0.99).unwrap();
        assert!(es.value > var.value);
    }

    #[test]
    fn test_es_infinite_when_shape_at_least_one() {
        assert!(gpd_es(2.0, 1.0, 1.0, 0.5).is_infinite());
        assert!(gpd_es(2.0, 1.0, 1.2, 0.5).is_infinite());
    }

    #[test]
    fn test_exponential_limit_var() {
        // xi = 0: u + beta * ln(p_tail / (1 - alpha))
        let var = gpd_var(1.0, 0.0, 0.5, 0.1, 0.99);
        assert_relative_eq!(var, 1.0 + 0.5 * (0.1f64 / 0.01).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_var_monotone_in_alpha() {
        let returns = normal_returns(2000, 0.01, 6);
        let estimator = TailRiskEstimator::default();
        let var_95 = estimator.var(&returns, 0.95).unwrap();
        let var_99 = estimator.var(&returns, 0.99).unwrap();
        assert!(var_95.value <= var_99.value);
    }
}
