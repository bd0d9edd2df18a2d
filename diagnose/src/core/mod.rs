//! Deterministic, pure logic shared by the diagnosis engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod auth;
pub mod invariants;
pub mod state;
pub mod types;
