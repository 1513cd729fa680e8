//! TARA: multi-model trading signal consolidation engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod llm;
pub mod engine;
pub mod dashboard;
