//! The orchestrator process: the UDP communication server, the control loop
//! with its laggard killer and failure-budget check, and the
//! persistence/reporting glue around checkpoint files and `best_jobs/`.
//! `hopt-cluster` and `hopt-optimizer` supply the pluggable backend and
//! optimizer this loop drives.

pub mod comm_server;
pub mod control_loop;
pub mod laggard;
pub mod launch_config;
pub mod report;

pub use comm_server::{CommServer, ConnectionInfo, Inbound};
pub use control_loop::{ControlLoop, ControlLoopConfig, EarlyKilling, KeyboardCommands};
pub use launch_config::LaunchConfig;
