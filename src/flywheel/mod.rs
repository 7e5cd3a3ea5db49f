//! Scheduling core: which users to refresh this minute, which of their
//! user-sites are eligible, and the bounded pools that run the work.

pub mod dispatch;
pub mod eligibility;
pub mod errors;
pub mod partition;
pub mod pool;
pub mod ports;
pub mod trigger;

pub use dispatch::{DispatchOutcome, RefreshDispatcher};
pub use errors::{DispatchError, PartitionError, PoolError};
pub use partition::{IdRange, MinuteOfDay, UuidRangePartitioner};
pub use trigger::{PassOutcome, PassSummary, PoolSizes, PoolStats, ScheduleTrigger};
