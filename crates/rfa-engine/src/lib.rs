#![deny(warnings)]

//! Rebate computations: tier selection, payouts, marketing payments, union
//! aggregation and the margin simulator.
//!
//! Everything here is a pure function of its inputs. Schedules are expected to
//! have been validated when they were written (see `rfa_core::TierSchedule`),
//! so the compute paths never fail on input shape; the only error raised is
//! [`MarginError::UndefinedSimulation`] for inverse queries with no solution.

pub mod calculator;
pub mod margin;
pub mod marketing;
pub mod tier_engine;
pub mod union;

pub use calculator::*;
pub use margin::*;
pub use marketing::*;
pub use tier_engine::*;
pub use union::*;

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors produced by the margin simulator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarginError {
    /// The commission received does not exceed the new rebate rate, so no
    /// turnover can preserve or grow the margin.
    #[error("undefined simulation: commission rate {commission_rate} <= new rebate rate {new_rate}")]
    UndefinedSimulation {
        commission_rate: Decimal,
        new_rate: Decimal,
    },
    /// Rates and turnover must be non-negative.
    #[error("simulator input `{0}` must be >= 0")]
    NegativeInput(&'static str),
}
