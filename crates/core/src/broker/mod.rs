//! Broker domain records - transactions, cash flows, securities, filters.

mod broker_model;

pub use broker_model::*;
