pub mod optimizer;
pub mod physical;

pub use optimizer::optimize;
pub use physical::{AggregateFunction, JoinType, PlanNode, SortOrder, build_executor};
