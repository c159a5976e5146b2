//! Scan engine: repository discovery, indicator matchers, orchestration.

pub mod events;
pub mod finding;
pub mod git;
pub mod matchers;
pub mod orchestrator;
pub mod patterns;
pub mod walker;
