//! Collaborator implementations.
//!
//! The traits themselves live in [`crate::core`]; this module holds concrete
//! implementations. Mocks ship as a regular module so downstream crates can
//! drive the orchestrator on a bench with no hardware attached.

pub mod mock;
