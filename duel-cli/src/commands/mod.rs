//! CLI command implementations.

pub mod battle;
pub mod outcome;
