//! FRKB test & validation infrastructure.
//!
//! Cross-crate suites exercising the sync protocol end to end: the literal
//! upload/diff/reset scenarios, the quantified invariants, the round-trip
//! laws and the boundary cases. Unit coverage lives with each crate; this
//! crate owns everything that spans the engine and its stores together.

pub mod boundaries;
pub mod gateway_integration;
pub mod harness;
pub mod invariants;
pub mod laws;
pub mod scenarios;
