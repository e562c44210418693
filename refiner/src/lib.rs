//! Objective-driven code refinement loop.
//!
//! `refiner` asks a reasoning model to change one file at a time inside a
//! sandbox directory, runs the sandbox entry point, and compares what it
//! printed against an expected result. The outcome is fed back to the model
//! until the output matches or a budget runs out.
//!
//! - **[`core`]**: Pure logic (session types, output classification, path
//!   containment, reply parsing, import scanning). No I/O.
//! - **[`io`]**: Side effects (config, session store, sandbox files, child
//!   processes, the model, prompts, operator questions).
//!
//! Orchestration modules ([`start`], [`select`], [`apply`], [`evaluate`],
//! [`looping`]) combine the two to implement the CLI commands.

pub mod apply;
pub mod context;
pub mod core;
pub mod evaluate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
