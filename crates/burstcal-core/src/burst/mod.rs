//! Burst partitioning, numbering and file naming.

mod batcher;
pub mod naming;

pub use batcher::{coordinates, BatchPlan, Burst, BurstBatcher, BurstFailure};
pub use naming::FileTemplate;
