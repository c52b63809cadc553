//! Types shared by every crate in the orchestrator: the job state machine, the
//! parameter value tree, filenames fixed by the on-disk layout, and the UDP
//! wire protocol between workers and the communication server.

pub mod constants;
pub mod error;
pub mod job;
pub mod value;
pub mod wire;

pub use error::{HoptError, UnknownJobError};
pub use job::{ClusterStatus, Job, JobId, JobPaths, JobStatus};
pub use value::{Settings, Value};
pub use wire::WireMessage;
