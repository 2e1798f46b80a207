//! Single-writer worker loop for the HealthArchive pipeline.

mod disk;
mod worker;

pub use disk::{device_of, disk_usage_pct, is_on_root_device, over_watermark};
pub use worker::{Worker, WorkerConfig, WorkerError};
