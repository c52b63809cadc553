//! Ask/tell optimizer interface and its three provided implementations.
//! Each is the simplest faithful realization of its strategy, not a
//! research-grade version.

pub mod cross_entropy;
pub mod csv;
pub mod distribution;
pub mod grid;
pub mod optimizer;
pub mod result_table;
pub mod search_space;

pub use cross_entropy::CrossEntropyOptimizer;
pub use distribution::DistributionOptimizer;
pub use grid::GridSearchOptimizer;
pub use optimizer::Optimizer;
pub use result_table::{ResultRow, ResultTable};
pub use search_space::{Distribution, ParamSpec, SearchSpace};
