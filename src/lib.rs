//! marketsweeper: multi-exchange market scanner and trade engine
//!
//! Aggregates spot markets from several exchanges, runs a set of
//! technical strategies over the top symbols, arbitrates the hits into
//! sized trades and tracks them with trailing stops until they close.

pub mod arguments;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod indicators;
pub mod logger;
pub mod markets;
pub mod notifications;
pub mod scanner;
pub mod signals;
pub mod strategies;
pub mod trades;
