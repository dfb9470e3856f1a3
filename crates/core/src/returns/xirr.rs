//! Newton-Raphson solver for the annualized rate that zeroes the net present
//! value of a dated cash-flow series:
//!
//! ```text
//! NPV(r) = Σ CF_i / (1 + r)^t_i = 0
//!
//! Where:
//!   CF_i = signed cash amount (negative = money invested)
//!   t_i  = years between the series start and the flow date
//! ```

use chrono::NaiveDate;

use crate::constants::DAYS_PER_YEAR;

const MAX_ITERATIONS: u32 = 100;
const INITIAL_GUESS: f64 = 0.1;

/// One dated, signed cash amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashFlow {
    pub amount: f64,
    pub date: NaiveDate,
}

impl CashFlow {
    pub fn new(amount: f64, date: NaiveDate) -> Self {
        Self { amount, date }
    }
}

/// Solves for the annualized rate of return of `flows`.
///
/// `tolerance` is the accepted |NPV| residual in currency units. Returns
/// `None` for a degenerate series (fewer than two flows, or all flows of one
/// sign) and on non-convergence; callers treat `None` as "not computable",
/// never as zero.
pub fn xirr(flows: &[CashFlow], tolerance: f64) -> Option<f64> {
    if flows.len() < 2 {
        return None;
    }
    let has_inflow = flows.iter().any(|flow| flow.amount > 0.0);
    let has_outflow = flows.iter().any(|flow| flow.amount < 0.0);
    if !has_inflow || !has_outflow {
        return None;
    }

    let start = flows.iter().map(|flow| flow.date).min()?;
    let series: Vec<(f64, f64)> = flows
        .iter()
        .map(|flow| {
            let years = (flow.date - start).num_days() as f64 / DAYS_PER_YEAR;
            (flow.amount, years)
        })
        .collect();

    let mut rate = INITIAL_GUESS;
    for _ in 0..MAX_ITERATIONS {
        let (npv, derivative) = npv_and_derivative(&series, rate);
        if !npv.is_finite() || !derivative.is_finite() {
            return None;
        }
        if npv.abs() < tolerance {
            return Some(rate);
        }
        if derivative.abs() < f64::EPSILON {
            return None;
        }
        let next = rate - npv / derivative;
        // the NPV equation is undefined at and below -100%
        if !next.is_finite() || next <= -1.0 {
            return None;
        }
        rate = next;
    }
    None
}

fn npv_and_derivative(series: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let mut npv = 0.0;
    let mut derivative = 0.0;
    for &(amount, years) in series {
        npv += amount * (1.0 + rate).powf(-years);
        derivative += -years * amount * (1.0 + rate).powf(-years - 1.0);
    }
    (npv, derivative)
}
