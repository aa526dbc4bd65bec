//! VaR backtesting
//!
//! Rolls VaR estimates forward over history and tests their adequacy:
//! - Kupiec proportion-of-failures test (unconditional coverage, χ² df 1)
//! - Christoffersen independence test and combined conditional coverage
//!   (χ² df 1 and df 2)
//! - Basel traffic-light zoning from binomial exception-count quantiles
//!
//! The walk is stateless: every invocation recomputes the full rolling
//! window sequence. Each day past the initial window gets a VaR estimate
//! from the trailing window under the requested method; an exception is
//! recorded when the realized loss exceeds that estimate. The hit series is
//! built once, in increasing date order, and feeds exception counting and
//! both statistical tests with identical alignment.

use crate::error::{Result, RiskError};
use crate::var::{RiskMetricCalculator, VarConfig, VarMethod};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, ChiSquared, ContinuousCDF, DiscreteCDF};
use std::fmt;
use tracing::debug;

/// Observed rates of exactly 0 or 1 are clamped here to avoid log(0)
const RATE_EPS: f64 = 1e-8;

/// Basel traffic-light classification of a VaR model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselZone {
    Green,
    Amber,
    Red,
}

impl fmt::Display for BaselZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Green => "green",
            Self::Amber => "amber",
            Self::Red => "red",
        };
        f.write_str(name)
    }
}

/// Full adequacy report for one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Number of out-of-sample observations tested
    pub n: usize,

    /// Number of VaR exceptions (realized loss above the estimate)
    pub exceptions: usize,

    pub exception_rate: f64,

    pub kupiec_lr: f64,
    pub kupiec_pvalue: f64,

    /// NaN when a transition probability is degenerate
    pub christoffersen_lr: f64,
    pub christoffersen_pvalue: f64,

    /// Combined conditional-coverage statistic (Kupiec + independence)
    pub cc_lr: f64,
    pub cc_pvalue: f64,

    pub basel_zone: BaselZone,

    pub alpha: f64,
    pub method: VarMethod,

    /// Rolling window length used for every estimate
    pub window: usize,
}

/// Kupiec proportion-of-failures outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KupiecOutcome {
    pub lr: f64,
    pub p_value: f64,
    pub exceptions: usize,
    pub observations: usize,
}

/// Christoffersen independence / conditional-coverage outcome.
///
/// All fields are NaN when any transition probability is degenerate; the
/// statistics are mathematically undefined there, not failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChristoffersenOutcome {
    pub lr_independence: f64,
    pub p_value_independence: f64,
    pub lr_conditional_coverage: f64,
    pub p_value_conditional_coverage: f64,
}

/// Rolling walk-forward VaR backtester
#[derive(Debug, Clone, Default)]
pub struct BacktestValidator {
    calculator: RiskMetricCalculator,
}

impl BacktestValidator {
    pub fn new(config: VarConfig) -> Self {
        Self {
            calculator: RiskMetricCalculator::new(config),
        }
    }

    /// Run the full rolling backtest for one method at one confidence level
    pub fn run(&self, returns: &[f64], alpha: f64, method: VarMethod) -> Result<BacktestReport> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(RiskError::InvalidInput(format!(
                "Confidence level must be between 0 and 1, got {alpha}"
            )));
        }

        let n = returns.len();
        let window = window_size(n);
        if n <= window {
            return Err(RiskError::InsufficientData(format!(
                "Series of {n} observations cannot support a rolling window of {window}"
            )));
        }

        // Walk forward in increasing date order; the same hit series feeds
        // exception counting and both tests.
        let mut hits = Vec::with_capacity(n - window);
        for t in window..n {
            let est = self.calculator.var(&returns[t - window..t], alpha, method)?;
            hits.push(-returns[t] > est.value);
        }

        let kupiec = kupiec_test(&hits, alpha)?;
        let christoffersen = christoffersen_test(&hits, alpha)?;
        let basel_zone = basel_zone(kupiec.exceptions, hits.len(), alpha)?;
        debug!(
            n = hits.len(),
            exceptions = kupiec.exceptions,
            %basel_zone,
            "backtest complete"
        );

        Ok(BacktestReport {
            n: hits.len(),
            exceptions: kupiec.exceptions,
            exception_rate: kupiec.exceptions as f64 / hits.len() as f64,
            kupiec_lr: kupiec.lr,
            kupiec_pvalue: kupiec.p_value,
            christoffersen_lr: christoffersen.lr_independence,
            christoffersen_pvalue: christoffersen.p_value_independence,
            cc_lr: christoffersen.lr_conditional_coverage,
            cc_pvalue: christoffersen.p_value_conditional_coverage,
            basel_zone,
            alpha,
            method,
            window,
        })
    }
}

/// Rolling window length: 250 observations for long series, otherwise at
/// least 60 and at most 60% of the series.
pub fn window_size(n: usize) -> usize {
    if n > 300 {
        250
    } else {
        ((0.6 * n as f64) as usize).max(60)
    }
}

/// Kupiec POF likelihood-ratio test on an exception indicator sequence.
///
/// Compares the observed exception rate against the nominal `1 − alpha`;
/// the statistic is asymptotically χ² with one degree of freedom.
pub fn kupiec_test(hits: &[bool], alpha: f64) -> Result<KupiecOutcome> {
    if hits.is_empty() {
        return Err(RiskError::InsufficientData(
            "Kupiec test needs at least one observation".to_string(),
        ));
    }

    let n = hits.len();
    let x = hits.iter().filter(|h| **h).count();

    let p = 1.0 - alpha;
    let pi = (x as f64 / n as f64).clamp(RATE_EPS, 1.0 - RATE_EPS);

    let ln_l0 = (n - x) as f64 * (1.0 - p).ln() + x as f64 * p.ln();
    let ln_l1 = (n - x) as f64 * (1.0 - pi).ln() + x as f64 * pi.ln();
    let lr = (2.0 * (ln_l1 - ln_l0)).max(0.0);

    Ok(KupiecOutcome {
        lr,
        p_value: chi_square_pvalue(lr, 1.0)?,
        exceptions: x,
        observations: n,
    })
}

/// Christoffersen independence test plus the combined conditional-coverage
/// statistic (independence LR + Kupiec LR, χ² df 2).
pub fn christoffersen_test(hits: &[bool], alpha: f64) -> Result<ChristoffersenOutcome> {
    let kupiec = kupiec_test(hits, alpha)?;

    let mut n00 = 0usize;
    let mut n01 = 0usize;
    let mut n10 = 0usize;
    let mut n11 = 0usize;
    for w in hits.windows(2) {
        match (w[0], w[1]) {
            (false, false) => n00 += 1,
            (false, true) => n01 += 1,
            (true, false) => n10 += 1,
            (true, true) => n11 += 1,
        }
    }

    let d0 = n00 + n01;
    let d1 = n10 + n11;
    let total = d0 + d1;
    if d0 == 0 || d1 == 0 || total == 0 {
        debug!(n00, n01, n10, n11, "degenerate transition counts");
        return Ok(ChristoffersenOutcome::undefined());
    }

    let pi01 = n01 as f64 / d0 as f64;
    let pi11 = n11 as f64 / d1 as f64;
    let pooled = (n01 + n11) as f64 / total as f64;

    // A transition probability at exactly 0 or 1 makes the likelihood ratio
    // undefined; report NaN rather than a fabricated statistic.
    for p in [pi01, pi11, pooled] {
        if p <= 0.0 || p >= 1.0 {
            debug!(pi01, pi11, pooled, "degenerate transition probability");
            return Ok(ChristoffersenOutcome::undefined());
        }
    }

    let ln_l0 = (n00 + n10) as f64 * (1.0 - pooled).ln() + (n01 + n11) as f64 * pooled.ln();
    let ln_l1 = n00 as f64 * (1.0 - pi01).ln()
        + n01 as f64 * pi01.ln()
        + n10 as f64 * (1.0 - pi11).ln()
        + n11 as f64 * pi11.ln();

    let lr_ind = (2.0 * (ln_l1 - ln_l0)).max(0.0);
    let lr_cc = lr_ind + kupiec.lr;

    Ok(ChristoffersenOutcome {
        lr_independence: lr_ind,
        p_value_independence: chi_square_pvalue(lr_ind, 1.0)?,
        lr_conditional_coverage: lr_cc,
        p_value_conditional_coverage: chi_square_pvalue(lr_cc, 2.0)?,
    })
}

impl ChristoffersenOutcome {
    fn undefined() -> Self {
        Self {
            lr_independence: f64::NAN,
            p_value_independence: f64::NAN,
            lr_conditional_coverage: f64::NAN,
            p_value_conditional_coverage: f64::NAN,
        }
    }
}

/// Basel traffic-light zone from binomial exception-count quantiles: the
/// upper 95th percentile bounds green, the upper 99.9th bounds amber.
pub fn basel_zone(exceptions: usize, n: usize, alpha: f64) -> Result<BaselZone> {
    let p = 1.0 - alpha;
    let binomial = Binomial::new(p, n as u64)
        .map_err(|e| RiskError::CalculationError(e.to_string()))?;

    let green_bound = binomial.inverse_cdf(0.95);
    let amber_bound = binomial.inverse_cdf(0.999);

    let x = exceptions as u64;
    Ok(if x <= green_bound {
        BaselZone::Green
    } else if x <= amber_bound {
        BaselZone::Amber
    } else {
        BaselZone::Red
    })
}

fn chi_square_pvalue(statistic: f64, df: f64) -> Result<f64> {
    let chi = ChiSquared::new(df).map_err(|e| RiskError::CalculationError(e.to_string()))?;
    Ok(1.0 - chi.cdf(statistic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn normal_returns(n: usize, sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Normal::new(0.0, sigma).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    #[test]
    fn test_window_size_policy() {
        assert_eq!(window_size(1000), 250);
        assert_eq!(window_size(301), 250);
        assert_eq!(window_size(300), 180);
        assert_eq!(window_size(200), 120);
        // 0.6 * 80 = 48, floored at 60
        assert_eq!(window_size(80), 60);
    }

    #[test]
    fn test_kupiec_matched_rate_is_near_zero() {
        // 5% exception rate against alpha = 0.95: LR ~ 0, p ~ 1
        let mut hits = vec![false; 1000];
        for i in 0..50 {
            hits[i * 20] = true;
        }
        let outcome = kupiec_test(&hits, 0.95).unwrap();
        assert!(outcome.lr < 1e-9);
        assert!(outcome.p_value > 0.99);
    }

    #[test]
    fn test_kupiec_zero_exceptions_rejects() {
        // No exceptions when 50 were expected: large LR, small p
        let hits = vec![false; 1000];
        let outcome = kupiec_test(&hits, 0.95).unwrap();
        assert!(outcome.lr > 10.0);
        assert!(outcome.p_value < 0.01);
    }

    #[test]
    fn test_christoffersen_clustered_exceptions() {
        // Exceptions arrive in runs: independence should be rejected
        let mut hits = vec![false; 400];
        for i in 100..120 {
            hits[i] = true;
        }
        for i in 300..315 {
            hits[i] = true;
        }
        let outcome = christoffersen_test(&hits, 0.95).unwrap();
        assert!(outcome.lr_independence > 10.0);
        assert!(outcome.p_value_independence < 0.01);
        assert!(outcome.lr_conditional_coverage >= outcome.lr_independence);
    }

    #[test]
    fn test_christoffersen_degenerate_is_nan() {
        // No exception is ever followed by another: pi11 = 0 is degenerate
        let mut hits = vec![false; 100];
        hits[10] = true;
        hits[50] = true;
        let outcome = christoffersen_test(&hits, 0.95).unwrap();
        assert!(outcome.lr_independence.is_nan());
        assert!(outcome.p_value_conditional_coverage.is_nan());

        // All-quiet sequence is degenerate too
        let quiet = vec![false; 100];
        let outcome = christoffersen_test(&quiet, 0.95).unwrap();
        assert!(outcome.lr_independence.is_nan());
    }

    #[test]
    fn test_basel_zones() {
        // 250 observations at 99%: expected 2.5 exceptions
        assert_eq!(basel_zone(2, 250, 0.99).unwrap(), BaselZone::Green);
        assert_eq!(basel_zone(7, 250, 0.99).unwrap(), BaselZone::Amber);
        assert_eq!(basel_zone(15, 250, 0.99).unwrap(), BaselZone::Red);
    }

    #[test]
    fn test_run_historical_backtest() {
        let returns = normal_returns(600, 0.01, 42);
        let validator = BacktestValidator::default();
        let report = validator.run(&returns, 0.95, VarMethod::Historical).unwrap();

        assert_eq!(report.window, 250);
        assert_eq!(report.n, 350);
        assert_eq!(report.method, VarMethod::Historical);
        // A well-specified model on its own distribution should pass Kupiec
        assert!(report.kupiec_pvalue > 0.01);
        assert!(report.basel_zone != BaselZone::Red);
        assert!((report.exception_rate - report.exceptions as f64 / 350.0).abs() < 1e-12);
    }

    #[test]
    fn test_run_ewma_backtest() {
        let returns = normal_returns(400, 0.012, 9);
        let validator = BacktestValidator::default();
        let report = validator.run(&returns, 0.99, VarMethod::Ewma).unwrap();
        assert_eq!(report.n, 150);
        assert!(report.kupiec_lr >= 0.0);
    }

    #[test]
    fn test_run_rejects_short_series() {
        let returns = normal_returns(50, 0.01, 1);
        let validator = BacktestValidator::default();
        assert!(validator.run(&returns, 0.95, VarMethod::Historical).is_err());
    }

    #[test]
    fn test_report_serializes_zone_lowercase() {
        let returns = normal_returns(600, 0.01, 8);
        let validator = BacktestValidator::default();
        let report = validator.run(&returns, 0.95, VarMethod::Historical).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(
            json.contains("\"basel_zone\":\"green\"")
                || json.contains("\"basel_zone\":\"amber\"")
                || json.contains("\"basel_zone\":\"red\"")
        );
    }
}
