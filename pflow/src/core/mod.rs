//! Deterministic, pure logic shared by the execution core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod errors;
pub mod ir;
pub mod outcome;
pub mod signature;
pub mod store;
