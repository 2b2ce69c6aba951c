//! Disk partitioning: device naming, partition plans and the partitioner.

pub mod naming;
pub mod partition;
pub mod plan;

pub use naming::{partition_path, DeviceHandle, DeviceNaming};
pub use partition::{PartitionedDisk, Partitioner};
pub use plan::{Boundary, PartitionPlan, PartitionRole, PartitionSpec};
