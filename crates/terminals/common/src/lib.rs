//! Terminal implementations that do not need a live MT5 installation.

pub mod simulated;

pub use simulated::{SimulatedHandle, SimulatedTerminal};
