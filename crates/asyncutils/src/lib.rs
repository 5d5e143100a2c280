//! Small concurrency building blocks used by the sync pipeline.
//!
//! - [`SingleFlight`] collapses concurrent operations on the same key into a
//!   single call whose result every caller shares.
//! - [`Gauge`] counts live work items (and remembers the peak) so callers can
//!   assert on memory bounds without instrumenting every channel.

mod gauge;
mod singleflight;

pub use crate::gauge::{Gauge, Ticket};
pub use crate::singleflight::{Flight, FlightError, SingleFlight};
