//! Creations: background orchestration of multi-part media generation jobs.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod provider;
pub mod store;
