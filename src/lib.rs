//! # varkit: Portfolio Tail-Risk Metrics and Backtesting
//!
//! This library computes Value at Risk and Expected Shortfall for portfolios
//! of dated return series, validates those estimates with standard coverage
//! backtests, and attributes portfolio risk to individual assets.
//!
//! ## Core Components
//!
//! - **Return aggregation**: price panels to return panels, weighted
//!   portfolio series with per-date renormalization over missing data
//! - **RiskMetricCalculator**: VaR/ES via historical simulation, parametric
//!   normal, EWMA, GARCH(1,1), and EVT (peaks-over-threshold GPD)
//! - **BacktestValidator**: rolling out-of-sample exception series with
//!   Kupiec, Christoffersen, conditional coverage, and Basel traffic-light
//!   verdicts
//! - **RiskAttributor**: incremental/marginal/relative VaR and
//!   covariance-based risk contributions (Ledoit-Wolf or sample)
//!
//! All estimates use the loss-positive convention: a 95% VaR of 0.02 means
//! a one-day loss exceeding 2% is expected on 5% of days.
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use varkit::{compute_returns, portfolio_returns, PricePanel};
//! use varkit::{RiskMetricCalculator, VarMethod};
//!
//! let dates: Vec<NaiveDate> = (1..=6)
//!     .map(|day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
//!     .collect();
//! let panel = PricePanel::new(
//!     dates,
//!     vec!["AAA".to_string(), "BBB".to_string()],
//!     vec![
//!         vec![100.0, 50.0],
//!         vec![101.0, 49.5],
//!         vec![99.0, 50.2],
//!         vec![100.5, 49.8],
//!         vec![99.8, 50.0],
//!         vec![100.2, 50.4],
//!     ],
//! )
//! .unwrap();
//!
//! let returns = compute_returns(&panel).unwrap();
//! let assets = returns.assets.clone();
//! let portfolio = portfolio_returns(&returns, &assets, None).unwrap();
//!
//! let calculator = RiskMetricCalculator::default();
//! let var = calculator
//!     .var(&portfolio.values, 0.95, VarMethod::Historical)
//!     .unwrap();
//! assert!(var.value > 0.0); // losses reported as positive magnitudes
//! ```

mod attribution;
mod backtest;
mod error;
mod evt;
#[cfg(feature = "garch")]
mod garch;
mod returns;
mod series;
#[cfg(feature = "shrinkage")]
mod shrinkage;
mod var;

pub use attribution::{
    AttributionConfig, CovarianceEstimator, IncrementalVar, MarginalVar, RelativeVarReport,
    RiskAttributor, RiskContribution, VolatilityAttribution,
};
pub use backtest::{
    basel_zone, christoffersen_test, kupiec_test, window_size, BacktestReport, BacktestValidator,
    BaselZone, ChristoffersenOutcome, KupiecOutcome,
};
pub use error::{Result, RiskError};
pub use evt::{EvtConfig, TailRiskEstimator};
#[cfg(feature = "garch")]
pub use garch::Garch11;
pub use returns::{compute_returns, portfolio_returns};
pub use series::{PricePanel, ReturnPanel, ReturnSeries};
#[cfg(feature = "shrinkage")]
pub use shrinkage::{ledoit_wolf_covariance, LedoitWolfCovariance};
pub use var::{EstimateDetails, GarchParams, RiskEstimate, RiskMetricCalculator, VarConfig, VarMethod};
