//! CLI command modules

pub mod env;
pub mod run;
pub mod schedule;
pub mod story;
