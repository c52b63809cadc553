use std::fmt;

/// Raised by the communication server when a UDP message names a job id not
/// present in the job table.
#[derive(Clone, Debug)]
pub struct UnknownJobError {
    pub job_id: u64,
}

impl fmt::Display for UnknownJobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no job with id {} in the job table", self.job_id)
    }
}

impl std::error::Error for UnknownJobError {}

/// Orchestrator-level fatal conditions: these abort before or during the
/// main loop rather than being absorbed as a per-job failure.
#[derive(Debug)]
pub enum HoptError {
    TooManyFailures { failed: u64, successful: u64, running: u64 },
    CheckpointDirUnwritable(std::io::Error),
    PortBindFailed(std::io::Error),
}

impl fmt::Display for HoptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoptError::TooManyFailures {
                failed,
                successful,
                running,
            } => write!(
                f,
                "too many jobs failed ({failed} failed vs {successful} successful, \
                 {running} running); ending procedure"
            ),
            HoptError::CheckpointDirUnwritable(e) => {
                write!(f, "result directory is not writable: {e}")
            }
            HoptError::PortBindFailed(e) => write!(f, "could not bind UDP control port: {e}"),
        }
    }
}

impl std::error::Error for HoptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HoptError::CheckpointDirUnwritable(e) | HoptError::PortBindFailed(e) => Some(e),
            HoptError::TooManyFailures { .. } => None,
        }
    }
}
