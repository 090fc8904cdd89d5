//! Persistence layer: job metadata and asset blobs.

pub mod events;
pub mod fs_assets;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use events::JobEventBus;
pub use fs_assets::FsAssetStore;
pub use libsql_backend::LibSqlBackend;
pub use traits::{AssetStore, JobStore};
