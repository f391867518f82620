// Library root: exposes the engine for the binary and for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod modules;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod services;
pub mod source;
pub mod store;

// Only the binary reads these, but integration tests can reach them too.
pub mod cli;
pub mod config;
pub mod logging;
