//! Creation jobs: the data model and the submission/observation service.

pub mod model;
pub mod service;

pub use model::{
    AssetRole, Job, JobEvent, JobKind, JobPatch, JobStatus, PartSpec, TaskHandle, asset_key,
    part_key,
};
pub use service::{JobService, NewJob};
