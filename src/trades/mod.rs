//! Trade persistence and lifecycle
//!
//! A trade moves `active -> closed_*` exactly once; every transition goes
//! through [`db::Database`] so restarts never lose an open position.

pub mod db;
pub mod lifecycle;
pub mod rescue;
pub mod trailing;
pub mod types;

pub use db::Database;
pub use lifecycle::{track_open_trades, TrackReport};
pub use types::{Trade, TradeMode, TradeStatus};
