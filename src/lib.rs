//! RadianceFleet detection and scoring core.
//!
//! Exposes every module for use by the operator binary and by integration
//! tests. Unlike a web backend split across many bounded-context services,
//! this crate has one coherent call graph (ingest -> detect -> score ->
//! classify -> evidence) so nothing here is gated behind an `AppState` the
//! way the teacher's HTTP/TUI surfaces were.

pub mod config;
pub mod confidence;
pub mod db;
pub mod detectors;
pub mod error;
pub mod evidence;
pub mod geo;
pub mod identity;
pub mod ingestion;
pub mod models;
pub mod orchestrator;
pub mod ownership;
pub mod scoring;

pub use config::Settings;
pub use db::Database;
pub use error::{RadianceError, Result};
