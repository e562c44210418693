//! Deterministic, pure logic shared by the refiner loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values (strings, paths, session records) and return deterministic outputs
//! suitable for tests.

pub mod budget;
pub mod classifier;
pub mod imports;
pub mod response;
pub mod sandbox;
pub mod types;
