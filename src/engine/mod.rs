//! Core engine: the market → analysts → judge → risk/reward scan loop.

pub mod evaluator;
pub mod judge;
pub mod panel;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
