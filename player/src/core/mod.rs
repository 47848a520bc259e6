//! Deterministic, pure logic shared by the player.
//!
//! Core modules are free of I/O side effects. They operate on in-memory values
//! (programs, pixel buffers, cursor state) and return deterministic outputs
//! suitable for tests.

pub mod invariants;
pub mod matching;
pub mod sanitize;
pub mod state;
pub mod types;
