//! The worker's three meaningful exit codes, wrapped so call sites read
//! `ExitCode::RESUME` instead of a bare magic `3`.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    pub const RESUME: ExitCode = ExitCode(3);

    pub fn is_resume(self) -> bool {
        self == ExitCode::RESUME
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::SUCCESS
    }
}

impl From<i32> for ExitCode {
    fn from(v: i32) -> Self {
        ExitCode(v)
    }
}

impl From<ExitCode> for i32 {
    fn from(v: ExitCode) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_three_worker_exit_codes() {
        assert!(ExitCode::from(0).is_success());
        assert!(!ExitCode::from(1).is_success());
        assert!(ExitCode::from(3).is_resume());
        assert!(!ExitCode::from(1).is_resume());
    }
}
