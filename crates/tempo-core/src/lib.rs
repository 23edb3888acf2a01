//! `tempo-core` — configuration and shared abstractions for the tempo
//! scheduling engine.
//!
//! Holds the pieces every other crate needs: the figment-backed
//! [`config::TempoConfig`] and the injectable [`clock::Clock`] used to make
//! time-dependent code deterministic in tests.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::TempoConfig;
pub use error::{CoreError, Result};
