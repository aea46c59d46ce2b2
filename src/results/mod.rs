//! 结果对象层
//!
//! 按槽的结果容器、尺寸检查和跨槽合并

pub mod merge;
pub mod object;
pub mod size_guard;
pub mod store;

pub use merge::{MergeEngine, MergeOutcome, TableMergeReport};
pub use object::{Accumulator, Axis, OpaqueObject, RecordTable, ResultObject, ResultPayload};
pub use size_guard::{GuardPhase, PrunedObject, SerializedSize, SizeEstimator, SizeGuard, DEFAULT_MAX_OBJECT_BYTES};
pub use store::{setup, SlotStore};
