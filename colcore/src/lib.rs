mod column;
mod lock;
mod partition;

pub use column::{Column, ColumnData, ColumnType};
pub use lock::{IndexLock, ReadLock, SoftWriteLock, WriteLock};
pub use partition::{Partition, PartitionReadLock};
