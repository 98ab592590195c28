//! CLI command implementations.

pub mod evaluate;
pub mod measures;
