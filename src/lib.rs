//! Farolero - wakes Docker Compose stacks on demand
//!
//! This library provides a small HTTP gateway that:
//! - Maps the leading label of the Host header to a configured stack
//! - Checks the container runtime for running containers of the stack's project
//! - Launches the stack with `docker compose up -d` when it is stopped,
//!   at most once at a time per project
//! - Keeps stack definitions in a YAML file editable from a web dashboard

pub mod activator;
pub mod compose;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod router;
pub mod runtime;
pub mod server;
pub mod store;
