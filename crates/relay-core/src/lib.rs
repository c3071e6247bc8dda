//! Relay core library: message model, provider adapters, generation turns.

pub mod config;
pub mod generation;
pub mod key_roulette;
pub mod logging;
pub mod message;
pub mod providers;
pub mod reasoning;
