//! The cluster abstraction: one `ClusterBackend` contract, a
//! batch-scheduler implementation and a local process-pool implementation,
//! plus the submission-hook mechanism both share.

pub mod backend;
pub mod batch;
pub mod hooks;
pub mod local;

pub use backend::{check_error_msgs, get_best_seen_value_of_main_metric, median_time_left, ClusterBackend};
pub use batch::{BatchBackend, BatchRequirements, SubmitCommand};
pub use hooks::{GitCheckoutHook, SubmissionHook};
pub use local::LocalBackend;
