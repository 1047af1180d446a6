//! MetaTrader 5 terminal adapter.
//!
//! The MT5 API is only reachable from the machine running the terminal. A
//! small script next to the terminal exposes it over a local socket and this
//! crate speaks to that script.

pub mod client;
pub mod protocol;

pub use client::{MetaTraderConfig, MetaTraderTerminal};
