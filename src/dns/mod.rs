//! DNS verdict logic.

pub mod engine;

pub use engine::{MatchPolicy, Verdict, VerdictEngine};
