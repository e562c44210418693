//! I/O adapters for the refiner loop.

pub mod config;
pub mod dependencies;
pub mod interaction;
pub mod model;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod prompt_log;
pub mod session_store;
pub mod workspace;
