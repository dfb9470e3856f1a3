//! FIFO position matching - opened/closed lots, matching engine, cache.

mod position_matcher;
mod positions_cache;
mod positions_errors;
mod positions_model;


pub use position_matcher::merge_contract_streams;
pub use positions_cache::{PositionsCache, PositionsKey};
pub use positions_errors::MatchingError;
pub use positions_model::{
    ClosedPosition, ClosingEvent, OpenedPosition, PositionHistory, Positions,
};
