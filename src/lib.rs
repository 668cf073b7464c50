//! Sandbox Claude library - isolated Docker sandboxes for Claude development sessions
//!
//! The registry records every sandbox, the lifecycle manager drives the
//! container runtime around it, and the sync engine moves credentials in and
//! out of containers.

pub mod cli;
pub mod config;
pub mod containers;
pub mod manager;
pub mod naming;
pub mod registry;
pub mod sync;
