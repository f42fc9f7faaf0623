//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `nettables` crate.
//!
//! It centralizes the error type, logging setup and the clocks used to
//! timestamp values and time-sync frames.

pub mod clock;
pub mod error;
pub mod logging;
