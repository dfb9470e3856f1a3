//! Profit figures per security - cost basis, payments, valuation, status.

mod profit_model;
mod profit_service;

#[cfg(test)]
mod profit_service_tests;

pub use profit_model::SecurityStatus;
pub use profit_service::ProfitService;
