//! GARCH(1,1) conditional volatility with normal innovations
//!
//! Variance recursion:
//! `sigma²_t = omega + alpha·r²_{t-1} + beta·sigma²_{t-1}`,
//! seeded with the unconditional variance. Parameters are estimated by
//! maximizing the Gaussian log-likelihood over a variance-targeted
//! (alpha, beta) grid, refined once around the coarse optimum. Stationarity
//! (alpha + beta < 1) is enforced throughout.

use crate::error::{Result, RiskError};
use crate::series::sample_mean;
use tracing::debug;

const MIN_VARIANCE: f64 = 1e-12;
const COARSE_STEP: f64 = 0.02;
const FINE_STEP: f64 = 0.002;

/// A fitted GARCH(1,1) model
#[derive(Debug, Clone)]
pub struct Garch11 {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    /// Conditional variance path, one entry per observation
    conditional_variance: Vec<f64>,
}

impl Garch11 {
    /// Fit a GARCH(1,1) by maximum likelihood.
    ///
    /// Uses variance targeting: for each (alpha, beta) candidate,
    /// `omega = var·(1 − alpha − beta)` pins the unconditional variance to
    /// the sample variance, leaving a two-parameter search.
    pub fn fit(returns: &[f64]) -> Result<Self> {
        if returns.len() < 10 {
            return Err(RiskError::InsufficientData(format!(
                "GARCH fitting needs at least 10 observations, got {}",
                returns.len()
            )));
        }

        let mean = sample_mean(returns);
        let centered: Vec<f64> = returns.iter().map(|r| r - mean).collect();
        let uncond_var = (centered.iter().map(|r| r * r).sum::<f64>() / centered.len() as f64)
            .max(MIN_VARIANCE);

        let coarse = search_grid(&centered, uncond_var, 0.0, 0.3, 0.5, 0.98, COARSE_STEP)?;
        let refined = search_grid(
            &centered,
            uncond_var,
            (coarse.0 - COARSE_STEP).max(0.0),
            coarse.0 + COARSE_STEP,
            (coarse.1 - COARSE_STEP).max(0.0),
            coarse.1 + COARSE_STEP,
            FINE_STEP,
        )?;

        let (alpha, beta) = refined;
        let omega = uncond_var * (1.0 - alpha - beta);
        let conditional_variance = variance_path(&centered, omega, alpha, beta, uncond_var);
        debug!(omega, alpha, beta, "fitted garch(1,1)");

        Ok(Self {
            omega,
            alpha,
            beta,
            conditional_variance,
        })
    }

    /// Conditional volatility at the final observation
    pub fn last_volatility(&self) -> f64 {
        self.conditional_variance
            .last()
            .copied()
            .unwrap_or(MIN_VARIANCE)
            .sqrt()
    }

    /// Full conditional volatility path
    pub fn volatilities(&self) -> Vec<f64> {
        self.conditional_variance
            .iter()
            .map(|v| v.sqrt())
            .collect()
    }

    /// alpha + beta; values near 1 indicate slowly decaying volatility shocks
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Long-run variance omega / (1 − alpha − beta)
    pub fn unconditional_variance(&self) -> Result<f64> {
        let persistence = self.persistence();
        if persistence >= 1.0 {
            return Err(RiskError::CalculationError(
                "Model is not stationary".to_string(),
            ));
        }
        Ok(self.omega / (1.0 - persistence))
    }
}

fn search_grid(
    centered: &[f64],
    uncond_var: f64,
    alpha_lo: f64,
    alpha_hi: f64,
    beta_lo: f64,
    beta_hi: f64,
    step: f64,
) -> Result<(f64, f64)> {
    let mut best: Option<((f64, f64), f64)> = None;

    let mut alpha = alpha_lo;
    while alpha <= alpha_hi + 1e-12 {
        let mut beta = beta_lo;
        while beta <= beta_hi + 1e-12 {
            if alpha + beta < 0.999 {
                let omega = uncond_var * (1.0 - alpha - beta);
                let ll = log_likelihood(centered, omega, alpha, beta, uncond_var);
                if ll.is_finite() && best.map_or(true, |(_, b)| ll > b) {
                    best = Some(((alpha, beta), ll));
                }
            }
            beta += step;
        }
        alpha += step;
    }

    best.map(|(params, _)| params).ok_or_else(|| {
        RiskError::CalculationError("GARCH likelihood surface is degenerate".to_string())
    })
}

fn variance_path(centered: &[f64], omega: f64, alpha: f64, beta: f64, seed: f64) -> Vec<f64> {
    let mut path = Vec::with_capacity(centered.len());
    let mut var = seed.max(MIN_VARIANCE);
    path.push(var);
    for t in 1..centered.len() {
        var = (omega + alpha * centered[t - 1] * centered[t - 1] + beta * var).max(MIN_VARIANCE);
        path.push(var);
    }
    path
}

fn log_likelihood(centered: &[f64], omega: f64, alpha: f64, beta: f64, seed: f64) -> f64 {
    let path = variance_path(centered, omega, alpha, beta, seed);
    let mut ll = 0.0;
    for (r, v) in centered.iter().zip(path.iter()) {
        ll += -0.5 * ((2.0 * std::f64::consts::PI).ln() + v.ln() + r * r / v);
    }
    ll
}
