//! dialect_fuzz: feedback-directed, grammar-based logic-bug finder for SQL
//! engines.
//!
//! Sessions build a random schema on the target, then run oracle checks
//! whose queries must agree regardless of how the engine optimizes them.
//! Every generated statement is broken down into syntax features; their
//! success rates turn features on and off for later sessions so generation
//! converges on what the dialect accepts. Dialect vocabulary (types,
//! functions, operators, clause fragments) is loaded from per-dialect files
//! and can be grown by an external learner.
//!
//! # Testing Approaches
//!
//! - **Non-optimizing reference engine construction (NoREC)**: Rigger & Su,
//!   "Detecting Optimization Bugs in Database Engines via Non-Optimizing
//!   Reference Engine Construction", ESEC/FSE 2020.
//! - **Ternary logic partitioning (TLP)**: Rigger & Su, "Finding Bugs in
//!   Database Systems via Query Partitioning", OOPSLA 2020.

pub mod ast;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod feature;
pub mod feedback;
pub mod fragments;
pub mod generator;
pub mod hash;
pub mod logging;
pub mod oracle;
pub mod report;
pub mod schema;
pub mod session;
pub mod state;

pub use config::FuzzConfig;
pub use error::{FuzzError, Outcome, Skip};
pub use session::{RunSummary, Session, SessionStatus, reproduce_from_file, run};
pub use state::EngineState;
