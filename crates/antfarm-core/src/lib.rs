//! Antfarm Core — the coordination kernel for multi-agent workflows.
//!
//! Antfarm orchestrates pipelines of steps, each assigned to a named agent.
//! An external agent runtime polls `claim`, performs the work, and reports
//! back via `complete` / `fail`; the kernel persists runs, steps, and
//! stories, renders step inputs by template substitution, interprets
//! structured output (including `STORIES_JSON` decompositions), drives the
//! per-story verify-each loop, and applies retry/escalation policy. It
//! never invokes an LLM itself.
//!
//! This crate has no HTTP framework dependency; the CLI (and any future
//! dashboard) consume it through [`state::AppState`].

pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod installer;
pub mod manifest;
pub mod models;
pub mod output;
pub mod paths;
pub mod state;
pub mod store;
pub mod template;
pub mod workspace;

// Convenience re-exports
pub use db::Database;
pub use error::CoreError;
pub use paths::AntfarmPaths;
pub use state::{AppState, AppStateInner};
