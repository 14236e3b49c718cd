//! This module contains the actual call implementations, as methods on `Cage`
pub mod net_calls;
pub mod poll_calls;
