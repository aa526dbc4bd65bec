//! Value at Risk and Expected Shortfall calculation
//!
//! Implements the point-estimate methods:
//! - Historical: empirical quantile of the return distribution
//! - Parametric `std`: sample mean/std with normal quantiles
//! - Parametric `ewma`: RiskMetrics-style recursive volatility
//! - Parametric `garch`: GARCH(1,1) conditional volatility (feature `garch`)
//! - `evt`: Generalized Pareto tail fit, delegated to [`crate::evt`]
//!
//! All estimates are returned as positive loss numbers. The parametric
//! family assumes normally distributed returns; that assumption is a
//! documented limitation of the method, not of the implementation.

use crate::error::{Result, RiskError};
use crate::series::{finite_values, quantile, sample_mean, sample_std, sample_variance};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::fmt;
use std::str::FromStr;

/// VaR calculation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarMethod {
    /// Empirical quantile of historical returns
    Historical,
    /// Normal quantile with sample standard deviation
    Std,
    /// Normal quantile with exponentially weighted volatility
    Ewma,
    /// Normal quantile with GARCH(1,1) conditional volatility
    Garch,
    /// Extreme Value Theory (Generalized Pareto tail)
    Evt,
}

impl FromStr for VarMethod {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "historical" => Ok(Self::Historical),
            "std" => Ok(Self::Std),
            "ewma" => Ok(Self::Ewma),
            "garch" => Ok(Self::Garch),
            "evt" => Ok(Self::Evt),
            other => Err(RiskError::InvalidInput(format!(
                "Unknown VaR method: {other}"
            ))),
        }
    }
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Historical => "historical",
            Self::Std => "std",
            Self::Ewma => "ewma",
            Self::Garch => "garch",
            Self::Evt => "evt",
        };
        f.write_str(name)
    }
}

/// Fitted GARCH(1,1) parameters carried in a parametric estimate
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

/// Method-specific parameters attached to a [`RiskEstimate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimateDetails {
    Historical {
        /// Empirical return quantile the estimate was derived from
        quantile: f64,
        /// Number of observations in the loss tail (ES only counts these)
        tail_observations: usize,
    },
    Parametric {
        mu: f64,
        sigma: f64,
        /// Left-tail standard normal quantile Φ⁻¹(1 − alpha); negative
        z: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        ewma_lambda: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        garch: Option<GarchParams>,
    },
    Evt {
        /// GPD shape ξ; absent when the estimator fell back to historical
        shape: Option<f64>,
        /// GPD scale β
        scale: Option<f64>,
        /// Loss threshold u the excesses were measured above
        threshold: Option<f64>,
        threshold_quantile: f64,
        excesses: usize,
        /// Set to `"historical"` when the sample was too small for a tail fit
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback: Option<String>,
    },
}

/// A point risk estimate: a positive loss at the given confidence level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Estimated loss (positive)
    pub value: f64,

    /// Confidence level, e.g. 0.99
    pub alpha: f64,

    /// Method that produced the estimate
    pub method: VarMethod,

    /// Method-specific parameters
    pub details: EstimateDetails,
}

/// Calculator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarConfig {
    /// EWMA decay factor λ
    pub ewma_lambda: f64,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self { ewma_lambda: 0.94 }
    }
}

/// VaR/ES calculation engine
#[derive(Debug, Clone, Default)]
pub struct RiskMetricCalculator {
    config: VarConfig,
}

impl RiskMetricCalculator {
    pub fn new(config: VarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VarConfig {
        &self.config
    }

    /// Value at Risk of a return series at confidence level `alpha`
    pub fn var(&self, returns: &[f64], alpha: f64, method: VarMethod) -> Result<RiskEstimate> {
        let clean = validate_series(returns, alpha)?;
        match method {
            VarMethod::Historical => Ok(self.historical(&clean, alpha, Measure::Var)),
            VarMethod::Std | VarMethod::Ewma | VarMethod::Garch => {
                self.parametric(&clean, alpha, method, Measure::Var)
            }
            VarMethod::Evt => crate::evt::TailRiskEstimator::default().var(&clean, alpha),
        }
    }

    /// Expected Shortfall of a return series at confidence level `alpha`
    pub fn es(&self, returns: &[f64], alpha: f64, method: VarMethod) -> Result<RiskEstimate> {
        let clean = validate_series(returns, alpha)?;
        match method {
            VarMethod::Historical => Ok(self.historical(&clean, alpha, Measure::Es)),
            VarMethod::Std | VarMethod::Ewma | VarMethod::Garch => {
                self.parametric(&clean, alpha, method, Measure::Es)
            }
            VarMethod::Evt => crate::evt::TailRiskEstimator::default().es(&clean, alpha),
        }
    }

    /// Historical VaR/ES from the empirical return distribution.
    ///
    /// VaR = −quantile(returns, 1 − alpha); ES is the negated mean of the
    /// returns at or below that quantile. An empty tail yields ES = 0.
    fn historical(&self, returns: &[f64], alpha: f64, measure: Measure) -> RiskEstimate {
        let q = quantile(returns, 1.0 - alpha);
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= q).collect();

        let value = match measure {
            Measure::Var => -q,
            Measure::Es => {
                if tail.is_empty() {
                    0.0
                } else {
                    -sample_mean(&tail)
                }
            }
        };

        RiskEstimate {
            value,
            alpha,
            method: VarMethod::Historical,
            details: EstimateDetails::Historical {
                quantile: q,
                tail_observations: tail.len(),
            },
        }
    }

    /// Parametric VaR/ES under normality.
    ///
    /// VaR = −(mu + z·sigma) with z = Φ⁻¹(1 − alpha);
    /// ES  = −(mu − sigma·φ(z)/(1 − alpha)).
    fn parametric(
        &self,
        returns: &[f64],
        alpha: f64,
        method: VarMethod,
        measure: Measure,
    ) -> Result<RiskEstimate> {
        let mu = sample_mean(returns);
        let (sigma, ewma_lambda, garch) = match method {
            VarMethod::Std => (sample_std(returns), None, None),
            VarMethod::Ewma => (
                ewma_sigma(returns, self.config.ewma_lambda),
                Some(self.config.ewma_lambda),
                None,
            ),
            VarMethod::Garch => {
                let (sigma, params) = garch_sigma(returns)?;
                (sigma, None, Some(params))
            }
            _ => unreachable!("parametric() only handles std/ewma/garch"),
        };

        let normal = standard_normal()?;
        let z = normal.inverse_cdf(1.0 - alpha);

        let value = match measure {
            Measure::Var => -(mu + z * sigma),
            Measure::Es => -(mu - sigma * normal.pdf(z) / (1.0 - alpha)),
        };

        Ok(RiskEstimate {
            value,
            alpha,
            method,
            details: EstimateDetails::Parametric {
                mu,
                sigma,
                z,
                ewma_lambda,
                garch,
            },
        })
    }
}

#[derive(Clone, Copy)]
enum Measure {
    Var,
    Es,
}

/// EWMA volatility: fold `var ← λ·var + (1−λ)·r²` over the series in
/// chronological order, seeded with the sample variance (0 when fewer than
/// two observations are available).
fn ewma_sigma(returns: &[f64], lambda: f64) -> f64 {
    let seed = sample_variance(returns);
    returns
        .iter()
        .fold(seed, |var, r| lambda * var + (1.0 - lambda) * r * r)
        .sqrt()
}

/// Last conditional GARCH(1,1) volatility. Returns are scaled ×100 before
/// fitting for numerical stability and the volatility is rescaled back.
#[cfg(feature = "garch")]
fn garch_sigma(returns: &[f64]) -> Result<(f64, GarchParams)> {
    let scaled: Vec<f64> = returns.iter().map(|r| r * 100.0).collect();
    let fit = crate::garch::Garch11::fit(&scaled)?;
    let params = GarchParams {
        omega: fit.omega,
        alpha: fit.alpha,
        beta: fit.beta,
    };
    Ok((fit.last_volatility() / 100.0, params))
}

#[cfg(not(feature = "garch"))]
fn garch_sigma(_returns: &[f64]) -> Result<(f64, GarchParams)> {
    Err(RiskError::DependencyUnavailable(
        "GARCH support is not compiled in (enable the `garch` feature)".to_string(),
    ))
}

pub(crate) fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| RiskError::CalculationError(e.to_string()))
}

fn validate_series(returns: &[f64], alpha: f64) -> Result<Vec<f64>> {
    if alpha <= 0.0 || alpha >= 1.0 {
        return Err(RiskError::InvalidInput(format!(
            "Confidence level must be between 0 and 1, got {alpha}"
        )));
    }
    let clean = finite_values(returns);
    if clean.is_empty() {
        return Err(RiskError::InvalidInput(
            "Return series has no finite observations".to_string(),
        ));
    }
    Ok(clean)
}
