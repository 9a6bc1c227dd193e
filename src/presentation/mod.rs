//! Thin HTTP surface over the orchestrator.

pub mod routes;

pub use routes::router;
